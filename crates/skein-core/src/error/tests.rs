use super::*;

#[test]
fn test_error_messages() {
    let err = Error::EmptyPipeline("nightly".to_string());
    assert_eq!(
        err.to_string(),
        "pipeline 'nightly' must contain at least one task"
    );

    let err = Error::InvalidCron {
        expression: "not a cron".to_string(),
        reason: "bad field".to_string(),
    };
    assert!(err.to_string().contains("not a cron"));
    assert!(err.to_string().contains("bad field"));
}

#[test]
fn test_serialization_error_conversion() {
    let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: Error = parse.unwrap_err().into();
    assert!(matches!(err, Error::Serialization(_)));
}
