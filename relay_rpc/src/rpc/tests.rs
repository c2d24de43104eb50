use super::*;

#[test]
fn subscribe_request() {
    let payload: Payload = Payload::Request(Request::new(
        1.into(),
        Params::Subscribe(Subscribe {
            topic: "c9e6d30fb34afe70a15c14e9337ba8e4d5a35dd695c39b94884b0ee60c69d168".into(),
        }),
    ));

    let serialized = serde_json::to_string(&payload).unwrap();

    assert_eq!(
        &serialized,
        r#"{"id":1,"jsonrpc":"2.0","method":"iridium_subscribe","params":{"topic":"c9e6d30fb34afe70a15c14e9337ba8e4d5a35dd695c39b94884b0ee60c69d168"}}"#
    );

    let deserialized: Payload = serde_json::from_str(&serialized).unwrap();

    assert_eq!(&payload, &deserialized)
}

#[test]
fn publish_request() {
    let payload: Payload = Payload::Request(Request::new(
        1.into(),
        Params::Publish(Publish {
            topic: "topic".into(),
            message: "payload".into(),
            ttl_secs: 12,
            tag: 1002,
            prompt: false,
        }),
    ));

    let serialized = serde_json::to_string(&payload).unwrap();

    assert_eq!(
        &serialized,
        r#"{"id":1,"jsonrpc":"2.0","method":"iridium_publish","params":{"topic":"topic","message":"payload","ttl":12,"tag":1002}}"#
    );

    let deserialized: Payload = serde_json::from_str(&serialized).unwrap();

    assert_eq!(&payload, &deserialized)
}

#[test]
fn subscription_notification() {
    let serialized = r#"{"id":1675757972688031,"jsonrpc":"2.0","method":"iridium_subscription","params":{"id":"sub_id","data":{"topic":"test_topic","message":"test_message","publishedAt":1675757972688,"tag":1002}}}"#;

    let deserialized: Payload = serde_json::from_str(serialized).unwrap();

    let Payload::Request(request) = &deserialized else {
        panic!("expected a request");
    };

    assert_eq!(request.id, 1675757972688031.into());

    let Params::Subscription(subscription) = &request.params else {
        panic!("expected subscription params");
    };

    assert_eq!(subscription.id.as_ref(), "sub_id");
    assert_eq!(subscription.data.topic.as_ref(), "test_topic");
    assert_eq!(subscription.data.tag, 1002);
}

#[test]
fn response_parsing() {
    // Responses with a fractional-zero float ID must still correlate.
    let serialized = r#"{"id":1675757972688031.0,"jsonrpc":"2.0","result":true}"#;

    let deserialized: Payload = serde_json::from_str(serialized).unwrap();

    assert_eq!(deserialized.id(), 1675757972688031.into());

    let serialized = r#"{"id":0,"jsonrpc":"2.0","error":{"code":-32600,"message":"invalid request"}}"#;

    let deserialized: Payload = serde_json::from_str(serialized).unwrap();

    assert!(deserialized.id().is_zero());
    assert!(matches!(
        deserialized,
        Payload::Response(Response::Error(_))
    ));
}

#[test]
fn validation() {
    let topic = Topic::from("c4163cf65859106b3f5435fc296e7765411178ed452d1c30337a6230138c9840");

    let request = Request::new(
        1.into(),
        Params::Subscribe(Subscribe {
            topic: "invalid topic".into(),
        }),
    );
    assert!(matches!(
        request.validate(),
        Err(ValidationError::TopicDecoding(_))
    ));

    let request = Request::new(
        1.into(),
        Params::Publish(Publish {
            topic: topic.clone(),
            message: "message".into(),
            ttl_secs: 0,
            tag: 1000,
            prompt: false,
        }),
    );
    assert!(matches!(
        request.validate(),
        Err(ValidationError::TtlOutOfRange { actual: 0, .. })
    ));

    let mut request = Request::new(
        1.into(),
        Params::Subscribe(Subscribe { topic }),
    );
    request.jsonrpc = "3.0".into();
    assert!(matches!(
        request.validate(),
        Err(ValidationError::JsonRpcVersion)
    ));
}

#[test]
fn message_id_generator() {
    let generator = MessageIdGenerator::new();

    let ids: Vec<_> = (0..64).map(|_| generator.next()).collect();

    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(ids.len(), deduped.len());

    for pair in ids.windows(2) {
        if let [prev, next] = pair {
            assert!(prev.value() < next.value());
        }
    }
}

#[test]
fn msg_id_digest() {
    let publish = Publish {
        topic: "topic".into(),
        message: "message".into(),
        ttl_secs: 300,
        tag: 0,
        prompt: false,
    };

    let subscription = publish.as_subscription(1.into(), SubscriptionId::generate(), 0);

    let Params::Subscription(subscription) = subscription.params else {
        panic!("expected subscription params");
    };

    // The digest only depends on the message body, so both sides of the
    // relay hop agree on it.
    assert_eq!(publish.msg_id(), subscription.msg_id());
    assert_eq!(publish.msg_id().len(), 64);
}
