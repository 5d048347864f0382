//! Property-based tests using proptest
//!
//! These tests check status validation, request building and body
//! serialization against randomized inputs.

use cloudrest::decode::ResponseDecoder;
use cloudrest::http::{HttpRequest, HttpResponse};
use cloudrest::operation::{
    Args, OperationDeclaration, OperationDescriptor, ParamKind, RequestBuilder,
};
use cloudrest::serializer::{Encoding, SerdeAdapter, SerializerAdapter};
use proptest::prelude::*;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};

/// Generate JSON documents from scalars, arrays and objects
fn arb_json(key: &'static str, text: &'static str) -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        text.prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, move |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(key, inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn descriptor(expected: &[u16]) -> OperationDescriptor {
    OperationDeclaration::new("getThing", "GET", "/things/{id}")
        .param(ParamKind::Path, "id")
        .expect(expected)
        .build()
        .unwrap()
}

fn response(status: u16, body: &'static str) -> HttpResponse {
    let request = HttpRequest::new(
        Method::GET,
        url::Url::parse("https://svc.io/things/1").unwrap(),
    );
    HttpResponse::buffered(
        &request,
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        body,
    )
}

proptest! {
    /// JSON bodies survive a serialize/deserialize round trip
    #[test]
    fn json_round_trip(value in arb_json("[a-zA-Z0-9_]{1,8}", "\\PC{0,16}")) {
        let adapter = SerdeAdapter;
        let bytes = adapter.serialize(&value, Encoding::Json).unwrap();
        let back = adapter.deserialize(&bytes, Encoding::Json).unwrap();
        prop_assert_eq!(back, value);
    }

    /// YAML bodies survive a serialize/deserialize round trip
    #[test]
    fn yaml_round_trip(value in arb_json("k[a-z0-9]{0,6}", "s[a-z0-9]{0,12}")) {
        let adapter = SerdeAdapter;
        let bytes = adapter.serialize(&value, Encoding::Yaml).unwrap();
        let back = adapter.deserialize(&bytes, Encoding::Yaml).unwrap();
        prop_assert_eq!(back, value);
    }

    /// A status in the expected set never produces a status error
    #[test]
    fn expected_status_is_accepted(
        status in 100u16..600,
        others in prop::collection::vec(100u16..600, 0..4),
    ) {
        let mut expected = others;
        expected.push(status);
        let descriptor = descriptor(&expected);
        let result = tokio_test::block_on(
            ResponseDecoder::default().validate(&descriptor, response(status, "{}"), &[]),
        );
        prop_assert!(result.is_ok());
    }

    /// A status outside the expected set produces an error with that status
    #[test]
    fn unexpected_status_is_reported(
        status in 100u16..600,
        expected in prop::collection::btree_set(100u16..600, 1..4),
    ) {
        prop_assume!(!expected.contains(&status));
        let expected: Vec<u16> = expected.into_iter().collect();
        let descriptor = descriptor(&expected);
        let err = tokio_test::block_on(
            ResponseDecoder::default().validate(&descriptor, response(status, "\"nope\""), &[]),
        )
        .unwrap_err();
        prop_assert_eq!(err.status(), Some(status));
        let expected_prefix = format!("Status code {status}");
        prop_assert!(err.to_string().starts_with(&expected_prefix));
    }

    /// Path arguments come back out of the built URL unchanged
    #[test]
    fn path_values_are_preserved(id in "[ -~]{1,24}") {
        prop_assume!(id != "." && id != "..");
        let descriptor = descriptor(&[200]);
        let args = Args::new().with("endpoint", "https://svc.io").with("id", id.clone());
        let request = RequestBuilder::new(&SerdeAdapter).build(&descriptor, &args).unwrap();

        let segments: Vec<_> = request.url.path_segments().unwrap().collect();
        prop_assert_eq!(segments.len(), 2);
        prop_assert_eq!(segments[0], "things");
        prop_assert_eq!(urlencoding::decode(segments[1]).unwrap(), id.as_str());
        prop_assert_eq!(request.header("content-length"), Some("0"));
    }
}
