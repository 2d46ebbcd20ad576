//! Tests for the message model: codes, option ordering, path assembly.

use teleserver::coap::{Code, Message, Method, MsgType, OptionNumber, MAX_OPTIONS};

#[test]
fn test_code_class_and_detail() {
    assert_eq!(Code::CONTENT.class(), 2);
    assert_eq!(Code::CONTENT.detail(), 5);
    assert_eq!(Code::new(4, 4), Code::NOT_FOUND);
    assert_eq!(Code::new(0, 1), Code::GET);
    assert_eq!(Code::INTERNAL_SERVER_ERROR.0, 160);
}

#[test]
fn test_code_display() {
    assert_eq!(Code::GET.to_string(), "GET");
    assert_eq!(Code::CONTENT.to_string(), "2.05 Content");
    assert_eq!(Code::new(4, 4).to_string(), "4.04 Not Found");
    assert_eq!(Code::new(2, 31).to_string(), "2.31");
}

#[test]
fn test_message_defaults() {
    let msg = Message::new();
    assert_eq!(msg.version, 1);
    assert_eq!(msg.mtype, MsgType::Confirmable);
    assert_eq!(msg.code, Code::EMPTY);
    assert!(msg.token.is_empty());
    assert!(msg.options().is_empty());
    assert!(msg.payload.is_empty());
    assert!(msg.is_valid());
}

#[test]
fn test_method_from_code() {
    assert_eq!(Method::from_code(Code::GET), Some(Method::Get));
    assert_eq!(Method::from_code(Code::DELETE), Some(Method::Delete));
    // 0.05 is class 0 but not a method
    assert_eq!(Method::from_code(Code(5)), None);
    assert_eq!(Method::from_code(Code::CONTENT), None);
    assert_eq!(Method::from_code(Code::EMPTY), None);
}

#[test]
fn test_add_option_keeps_ascending_order() {
    let mut msg = Message::new();
    msg.add_option(OptionNumber::ContentFormat, &[50]).unwrap();
    msg.add_option(OptionNumber::UriPath, b"a").unwrap();
    msg.add_option(OptionNumber::IfMatch, &[1]).unwrap();

    let numbers: Vec<u16> = msg.options().iter().map(|o| o.number).collect();
    assert_eq!(numbers, vec![1, 11, 12]);
}

#[test]
fn test_duplicate_options_keep_insertion_order() {
    let mut msg = Message::new();
    msg.add_option(OptionNumber::UriPath, b"first").unwrap();
    msg.add_option(OptionNumber::UriPath, b"second").unwrap();
    msg.add_option(OptionNumber::UriPath, b"third").unwrap();

    let values: Vec<&[u8]> = msg.options().iter().map(|o| o.value.as_slice()).collect();
    assert_eq!(values, vec![&b"first"[..], b"second", b"third"]);
}

#[test]
fn test_option_capacity() {
    let mut msg = Message::new();
    for i in 0..MAX_OPTIONS {
        msg.add_option(i as u16, &[]).unwrap();
    }
    assert!(msg.add_option(100u16, &[]).is_err());
}

#[test]
fn test_option_value_length_cap() {
    let mut msg = Message::new();
    assert!(msg.add_option(OptionNumber::UriQuery, &[0u8; 270]).is_ok());
    assert!(msg.add_option(OptionNumber::UriQuery, &[0u8; 271]).is_err());
}

#[test]
fn test_find_option() {
    let mut msg = Message::new();
    msg.add_option(OptionNumber::UriPath, b"x").unwrap();
    msg.add_option(OptionNumber::ContentFormat, &[50]).unwrap();

    assert_eq!(
        msg.find_option(OptionNumber::ContentFormat).map(|o| o.value.as_slice()),
        Some(&[50u8][..])
    );
    assert!(msg.find_option(OptionNumber::Accept).is_none());
}

#[test]
fn test_uri_path_join() {
    let mut msg = Message::new();
    assert_eq!(msg.uri_path(), "");

    msg.add_option(OptionNumber::UriPath, b"sensor").unwrap();
    msg.add_option(OptionNumber::UriPath, b"temp").unwrap();
    assert_eq!(msg.uri_path(), "sensor/temp");
}

#[test]
fn test_uri_path_truncated() {
    let mut msg = Message::new();
    for _ in 0..3 {
        msg.add_option(OptionNumber::UriPath, &[b'a'; 100]).unwrap();
    }
    assert_eq!(msg.uri_path().len(), 128);
}

#[test]
fn test_request_response_classes() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    assert!(msg.is_request());
    assert!(!msg.is_response());

    msg.code = Code::CONTENT;
    assert!(!msg.is_request());
    assert!(msg.is_response());

    msg.code = Code::EMPTY;
    assert!(!msg.is_request());
    assert!(!msg.is_response());
}
