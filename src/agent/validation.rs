//! Configuration validation
//!
//! Each function returns the human-readable problem list the host shows
//! before activation; an empty list means the parameters are usable.
//! Nothing here touches the network.

use crate::codec::{AttributeType, WireFormat};
use crate::config::{columns, keys, AgentParameters, AgentRole, AgentVariant, ConfigError, Grid};
use crate::transport::mqtt::connection::load_ca_certificate;
use crate::transport::{QosLevel, TlsProtocol};
use std::path::Path;

/// Validate for `role`, folding any problems into [`ConfigError::Validation`]
pub fn ensure_valid(
    role: AgentRole,
    variant: AgentVariant,
    parameters: &AgentParameters,
) -> Result<(), ConfigError> {
    let errors = match role {
        AgentRole::Subscriber => validate_subscriber(variant, parameters),
        AgentRole::Publisher => validate_publisher(variant, parameters),
    };
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors))
    }
}

pub fn validate_subscriber(variant: AgentVariant, parameters: &AgentParameters) -> Vec<String> {
    let mut errors = Vec::new();
    check_broker_and_topic(parameters, &mut errors);

    if variant == AgentVariant::Advanced {
        check_security(parameters, &mut errors);
        check_orphan_password(parameters, &mut errors);
        check_qos(parameters, &mut errors);
    }

    check_payload_definition(parameters, &mut errors);
    errors
}

pub fn validate_publisher(variant: AgentVariant, parameters: &AgentParameters) -> Vec<String> {
    let mut errors = Vec::new();
    check_broker_and_topic(parameters, &mut errors);

    if variant == AgentVariant::Advanced {
        check_security(parameters, &mut errors);
        if !parameters.flag(keys::ANONYMOUS, false) {
            check_orphan_password(parameters, &mut errors);
        }
        check_qos(parameters, &mut errors);
        check_nested_object(parameters, &mut errors);
    }

    errors
}

fn check_broker_and_topic(parameters: &AgentParameters, errors: &mut Vec<String>) {
    if parameters.is_blank(keys::BROKER) {
        errors.push("No broker address is set.".to_string());
    }
    if parameters.is_blank(keys::TOPIC) {
        errors.push("No broker channel is set.".to_string());
    }
}

fn check_security(parameters: &AgentParameters, errors: &mut Vec<String>) {
    if !parameters.flag(keys::SECURE, false) {
        return;
    }

    match parameters.non_blank(keys::CA_CERT) {
        None => errors.push(
            "Secure channel requested, but no Certificate Authority's certificate has been attached."
                .to_string(),
        ),
        Some(path) => {
            if let Err(e) = load_ca_certificate(Path::new(path)) {
                errors.push(format!("Certificate Authority's certificate could not be loaded: {e}"));
            }
        }
    }

    if let Some(protocol) = parameters.non_blank(keys::PROTOCOL) {
        if protocol.parse::<TlsProtocol>().is_err() {
            errors.push(format!("Unknown secure protocol '{protocol}'."));
        }
    }
}

fn check_orphan_password(parameters: &AgentParameters, errors: &mut Vec<String>) {
    if !parameters.is_blank(keys::PASSWORD) && parameters.is_blank(keys::USERNAME) {
        errors.push("Authentication password present, but username is not defined.".to_string());
    }
}

fn check_qos(parameters: &AgentParameters, errors: &mut Vec<String>) {
    if let Some(qos) = parameters.non_blank(keys::QOS) {
        if qos.parse::<QosLevel>().is_err() {
            errors.push(format!("Unknown QoS level '{qos}'."));
        }
    }
}

fn check_payload_definition(parameters: &AgentParameters, errors: &mut Vec<String>) {
    let grid = match parameters.grid(keys::PAYLOAD_DEFINITION) {
        Ok(grid) if !grid.is_empty() => grid,
        Ok(_) => {
            errors.push("Payload is not defined.".to_string());
            return;
        }
        Err(e) => {
            errors.push(format!("Payload is not defined: {e}"));
            return;
        }
    };

    let specify_path = parameters.flag(keys::SPECIFY_JPATH, false);
    let json_format = parameters
        .non_blank(keys::FORMAT)
        .unwrap_or(WireFormat::Json.as_str())
        == WireFormat::Json.as_str();

    for (index, row) in grid.rows().iter().enumerate() {
        let row_number = index + 1;
        if specify_path && row.text(columns::PATH).is_empty() {
            errors.push(format!("JSON Path is not specified on row {row_number}"));
        }
        if json_format {
            let type_name = row.text(columns::TYPE);
            if !type_name.trim().is_empty() && AttributeType::parse(&type_name).is_none() {
                errors.push(format!("Unknown data type '{type_name}' on row {row_number}"));
            }
        }
    }
}

fn check_nested_object(parameters: &AgentParameters, errors: &mut Vec<String>) {
    if !parameters.flag(keys::USE_NESTED_OBJECT, false) {
        return;
    }

    if parameters.is_blank(keys::OBJECT_NAME) {
        errors.push("Nested object requested, but no object name is set.".to_string());
    }

    match parameters.grid(keys::OBJECT_PROPERTIES) {
        Ok(grid) if has_source_rows(&grid) => {}
        Ok(_) => errors.push("Nested object requested, but no object properties are defined.".to_string()),
        Err(e) => errors.push(format!("Nested object properties are invalid: {e}")),
    }
}

fn has_source_rows(grid: &Grid) -> bool {
    grid.rows()
        .iter()
        .any(|row| !row.text(columns::SOURCE).trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"[{"Name":"temp","Path":"$.t","Type":"Double"}]"#;

    fn subscriber_parameters() -> AgentParameters {
        AgentParameters::new()
            .with(keys::BROKER, "localhost")
            .with(keys::TOPIC, "plant/line1")
            .with(keys::PAYLOAD_DEFINITION, PAYLOAD)
    }

    #[test]
    fn test_ensure_valid_collects_problems() {
        assert!(ensure_valid(
            AgentRole::Subscriber,
            AgentVariant::Advanced,
            &subscriber_parameters()
        )
        .is_ok());

        let result = ensure_valid(
            AgentRole::Publisher,
            AgentVariant::Basic,
            &AgentParameters::new(),
        );
        match result {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors, validate_publisher(AgentVariant::Basic, &AgentParameters::new()));
                assert!(!errors.is_empty());
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_subscriber() {
        assert!(validate_subscriber(AgentVariant::Advanced, &subscriber_parameters()).is_empty());
        assert!(validate_subscriber(AgentVariant::Basic, &subscriber_parameters()).is_empty());
    }

    #[test]
    fn test_missing_broker_and_topic() {
        let errors = validate_subscriber(
            AgentVariant::Basic,
            &AgentParameters::new().with(keys::PAYLOAD_DEFINITION, PAYLOAD).with(keys::BROKER, " "),
        );
        assert_eq!(errors, vec!["No broker address is set.", "No broker channel is set."]);
    }

    #[test]
    fn test_secure_without_ca() {
        let parameters = subscriber_parameters().with(keys::SECURE, "true");
        let errors = validate_subscriber(AgentVariant::Advanced, &parameters);
        assert_eq!(
            errors,
            vec!["Secure channel requested, but no Certificate Authority's certificate has been attached."]
        );
    }

    #[test]
    fn test_secure_is_ignored_by_basic_variant() {
        let parameters = subscriber_parameters().with(keys::SECURE, "true");
        assert!(validate_subscriber(AgentVariant::Basic, &parameters).is_empty());
    }

    #[test]
    fn test_unloadable_ca() {
        let parameters = subscriber_parameters()
            .with(keys::SECURE, "true")
            .with(keys::CA_CERT, "/nonexistent/ca.pem");
        let errors = validate_subscriber(AgentVariant::Advanced, &parameters);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Certificate Authority's certificate could not be loaded"));
    }

    #[test]
    fn test_orphan_password() {
        let parameters = subscriber_parameters().with(keys::PASSWORD, "secret");
        assert_eq!(
            validate_subscriber(AgentVariant::Advanced, &parameters),
            vec!["Authentication password present, but username is not defined."]
        );
    }

    #[test]
    fn test_payload_not_defined() {
        let parameters = subscriber_parameters().with(keys::PAYLOAD_DEFINITION, "[]");
        assert_eq!(
            validate_subscriber(AgentVariant::Basic, &parameters),
            vec!["Payload is not defined."]
        );

        let parameters = subscriber_parameters().with(keys::PAYLOAD_DEFINITION, "{oops");
        let errors = validate_subscriber(AgentVariant::Basic, &parameters);
        assert!(errors[0].starts_with("Payload is not defined"));
    }

    #[test]
    fn test_json_path_required_per_row() {
        let parameters = subscriber_parameters()
            .with(keys::SPECIFY_JPATH, "true")
            .with(
                keys::PAYLOAD_DEFINITION,
                r#"[{"Name":"a","Path":"$.a"},{"Name":"b","Path":""},{"Name":"c"}]"#,
            );
        assert_eq!(
            validate_subscriber(AgentVariant::Basic, &parameters),
            vec!["JSON Path is not specified on row 2", "JSON Path is not specified on row 3"]
        );
    }

    #[test]
    fn test_unknown_type_only_in_json_mode() {
        let payload = r#"[{"Name":"a","Path":"$.a","Type":"Decimal","ByteIndexes":"0"}]"#;
        let parameters = subscriber_parameters().with(keys::PAYLOAD_DEFINITION, payload);
        assert_eq!(
            validate_subscriber(AgentVariant::Advanced, &parameters),
            vec!["Unknown data type 'Decimal' on row 1"]
        );

        let parameters = parameters.with(keys::FORMAT, "HEX");
        assert!(validate_subscriber(AgentVariant::Advanced, &parameters).is_empty());
    }

    #[test]
    fn test_blank_format_checks_types_as_json() {
        let payload = r#"[{"Name":"a","Path":"$.a","Type":"Decimal"}]"#;
        let parameters = subscriber_parameters()
            .with(keys::PAYLOAD_DEFINITION, payload)
            .with(keys::FORMAT, "  ");
        assert_eq!(
            validate_subscriber(AgentVariant::Advanced, &parameters),
            vec!["Unknown data type 'Decimal' on row 1"]
        );
    }

    #[test]
    fn test_unknown_qos_and_protocol() {
        let parameters = subscriber_parameters()
            .with(keys::QOS, "Sometimes")
            .with(keys::SECURE, "false")
            .with(keys::PROTOCOL, "TLSv9");
        assert_eq!(
            validate_subscriber(AgentVariant::Advanced, &parameters),
            vec!["Unknown QoS level 'Sometimes'."]
        );
    }

    #[test]
    fn test_publisher_basic_needs_only_broker_and_topic() {
        let parameters = AgentParameters::new()
            .with(keys::BROKER, "localhost")
            .with(keys::TOPIC, "out")
            .with(keys::PASSWORD, "orphan");
        assert!(validate_publisher(AgentVariant::Basic, &parameters).is_empty());
        assert_eq!(validate_publisher(AgentVariant::Advanced, &parameters).len(), 1);
    }

    #[test]
    fn test_publisher_anonymous_skips_password_check() {
        let parameters = AgentParameters::new()
            .with(keys::BROKER, "localhost")
            .with(keys::TOPIC, "out")
            .with(keys::PASSWORD, "orphan")
            .with(keys::ANONYMOUS, "true");
        assert!(validate_publisher(AgentVariant::Advanced, &parameters).is_empty());
    }

    #[test]
    fn test_publisher_nested_object_requirements() {
        let parameters = AgentParameters::new()
            .with(keys::BROKER, "localhost")
            .with(keys::TOPIC, "out")
            .with(keys::USE_NESTED_OBJECT, "true");
        assert_eq!(
            validate_publisher(AgentVariant::Advanced, &parameters),
            vec![
                "Nested object requested, but no object name is set.",
                "Nested object requested, but no object properties are defined."
            ]
        );

        let parameters = parameters
            .with(keys::OBJECT_NAME, "data")
            .with(keys::OBJECT_PROPERTIES, r#"[{"Source":"t","Alias":"temp"}]"#);
        assert!(validate_publisher(AgentVariant::Advanced, &parameters).is_empty());
    }
}
