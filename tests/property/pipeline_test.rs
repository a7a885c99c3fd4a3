// tests/property/pipeline_test.rs

//! Property-based tests for pipelining
//! Tests that any batch of replies comes back complete and in issue order

use crate::test_helpers::*;
use proptest::prelude::*;
use spinel_conn::Reply;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 20,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_pipelined_replies_keep_issue_order(
        values in prop::collection::vec(
            prop_oneof![
                any::<i64>().prop_map(Ok::<i64, String>),
                "[a-z ]{1,20}".prop_map(Err::<i64, String>),
            ],
            1..40,
        ),
    ) {
        let script = values.clone();
        let server = MockServer::start(1, move |_, peer| {
            let mut out = Vec::new();
            for (i, value) in script.iter().enumerate() {
                let key = format!("k{i}");
                peer.expect(&["GET", key.as_str()]);
                match value {
                    Ok(n) => out.extend(integer(*n)),
                    Err(msg) => out.extend(error(&format!("ERR {msg}"))),
                }
            }
            peer.reply(&out);
        });

        let mut conn = server.connection();
        for i in 0..values.len() {
            conn.send_str("GET", &[format!("k{i}").as_str()]).unwrap();
        }
        let replies = conn.get_many(values.len()).unwrap();
        drop(conn);
        server.join();

        let expected: Vec<Reply> = values
            .into_iter()
            .map(|v| match v {
                Ok(n) => Reply::Integer(n),
                Err(msg) => Reply::Error(format!("ERR {msg}")),
            })
            .collect();
        prop_assert_eq!(replies, expected);
    }
}
