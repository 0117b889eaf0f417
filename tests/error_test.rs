//! Tests for error types

use trueno_ml::Error;

#[test]
fn test_validation_error() {
    let error = Error::Validation("'targets' must not be empty".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Validation error"));
    assert!(error_str.contains("targets"));
    assert!(error.is_validation());
}

#[test]
fn test_model_not_found_error() {
    let error = Error::ModelNotFound("run-42".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Model not found"));
    assert!(error_str.contains("run-42"));
    assert!(error_str.contains("Train a model first"));
    assert!(!error.is_validation());
}

#[test]
fn test_data_access_error() {
    let error = Error::DataAccess("File not found: steel.csv".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Data access error"));
    assert!(error_str.contains("steel.csv"));
}

#[test]
fn test_computation_error() {
    let error = Error::Computation("fold RMSE is not finite".to_string());
    assert!(format!("{error}").contains("Computation error"));
}

#[test]
fn test_explainability_error() {
    let error = Error::Explainability("empty background set".to_string());
    assert!(format!("{error}").contains("Explainability failure"));
}

#[test]
fn test_cancelled_and_not_found() {
    assert_eq!(format!("{}", Error::Cancelled), "Run cancelled");
    let error_str = format!("{}", Error::NotFound("abc".to_string()));
    assert!(error_str.contains("abc"));
    assert!(error_str.contains("not found"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_arrow_error_conversion() {
    let arrow_error = arrow::error::ArrowError::InvalidArgumentError("bad column".to_string());
    let error: Error = arrow_error.into();
    assert!(format!("{error}").contains("Arrow error"));
}

#[test]
fn test_serialization_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::Validation("test".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Validation"));
}
