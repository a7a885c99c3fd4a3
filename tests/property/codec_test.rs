// tests/property/codec_test.rs

//! Property-based tests for the RESP codec
//! Tests that decoding is independent of how the input is split into reads

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use spinel_conn::Reply;
use spinel_conn::core::protocol::{Request, RespCodec};
use tokio_util::codec::{Decoder, Encoder};

fn arb_reply() -> impl Strategy<Value = Reply> {
    let leaf = prop_oneof![
        "[a-zA-Z0-9 ]{0,32}".prop_map(Reply::Status),
        "[a-zA-Z0-9 ]{0,32}".prop_map(Reply::Error),
        any::<i64>().prop_map(Reply::Integer),
        prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(|b| Reply::Bulk(Some(Bytes::from(b)))),
        Just(Reply::Bulk(None)),
        Just(Reply::Array(None)),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop::collection::vec(inner, 0..8).prop_map(|items| Reply::Array(Some(items)))
    })
}

fn write_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Status(s) => out.extend(format!("+{s}\r\n").into_bytes()),
        Reply::Error(s) => out.extend(format!("-{s}\r\n").into_bytes()),
        Reply::Integer(i) => out.extend(format!(":{i}\r\n").into_bytes()),
        Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        Reply::Bulk(Some(b)) => {
            out.extend(format!("${}\r\n", b.len()).into_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Reply::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        Reply::Array(Some(items)) => {
            out.extend(format!("*{}\r\n", items.len()).into_bytes());
            for item in items {
                write_reply(item, out);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_decode_is_independent_of_read_boundaries(
        replies in prop::collection::vec(arb_reply(), 1..6),
        chunk in 1usize..17,
    ) {
        let mut wire = Vec::new();
        for reply in &replies {
            write_reply(reply, &mut wire);
        }

        let mut codec = RespCodec;
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(reply) = codec.decode(&mut buf).unwrap() {
                decoded.push(reply);
            }
        }

        prop_assert_eq!(decoded, replies);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_request_frames_as_array_of_bulk_strings(
        command in "[A-Z]{1,12}",
        args in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..10),
    ) {
        let mut buf = BytesMut::new();
        RespCodec
            .encode(Request::new(command.as_bytes(), &args), &mut buf)
            .unwrap();

        let mut expected = vec![Reply::Bulk(Some(Bytes::from(command.clone().into_bytes())))];
        expected.extend(args.iter().map(|a| Reply::Bulk(Some(Bytes::from(a.clone())))));

        let decoded = RespCodec.decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, Some(Reply::Array(Some(expected))));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_frame_is_incomplete_not_error(
        reply in arb_reply(),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut wire = Vec::new();
        write_reply(&reply, &mut wire);
        let cut = cut.index(wire.len());

        let mut buf = BytesMut::from(&wire[..cut]);
        prop_assert_eq!(RespCodec.decode(&mut buf).unwrap(), None);
        prop_assert_eq!(buf.len(), cut);
    }
}
