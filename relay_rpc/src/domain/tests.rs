use super::*;

#[test]
fn topic_decoding() {
    let topic_str = "85089843cebc89ce5bbffd55377b2e65c8a32c2d0a76742f2d6852b5f531a460";
    let topic_bin = topic_str.parse::<DecodedTopic>().unwrap();

    assert_eq!(topic_str, Topic::from(topic_bin).as_ref());

    assert!(matches!(
        "85089843ce".parse::<DecodedTopic>(),
        Err(DecodingError::Length)
    ));

    assert!(matches!(
        "zz089843cebc89ce5bbffd55377b2e65c8a32c2d0a76742f2d6852b5f531a460"
            .parse::<DecodedTopic>(),
        Err(DecodingError::Encoding)
    ));
}

#[test]
fn topic_generation() {
    let topic = Topic::generate();

    assert_eq!(topic.as_ref().len(), 64);
    assert!(topic.decode().is_ok());
}

#[test]
fn message_id_deserialization() {
    let id: MessageId = serde_json::from_str("1675757972688031").unwrap();
    assert_eq!(id, MessageId::new(1675757972688031));

    // Some peer SDKs emit IDs as floats with a zero fractional part, or as
    // decimal strings. Both must parse into the same integer ID.
    let id: MessageId = serde_json::from_str("1675757972688031.0").unwrap();
    assert_eq!(id, MessageId::new(1675757972688031));

    let id: MessageId = serde_json::from_str(r#""1675757972688031""#).unwrap();
    assert_eq!(id, MessageId::new(1675757972688031));

    assert!(serde_json::from_str::<MessageId>("1675757972688031.5").is_err());
}

#[test]
fn message_id_serialization() {
    let serialized = serde_json::to_string(&MessageId::new(123)).unwrap();
    assert_eq!(serialized, "123");
}
