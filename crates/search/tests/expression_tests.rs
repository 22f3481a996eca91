//! Query parsing integration tests, driven through the assembled catalog.

mod common;

use common::*;
use helios_search::expression::Expression;
use helios_search::SearchError;

#[test]
fn test_string_queries() {
    let catalog = default_catalog();

    assert_eq!(
        catalog.parse(&["Patient"], "name", "Smith").unwrap().to_string(),
        "(Param name (StartsWithIgnoreCase String 'Smith'))"
    );
    assert_eq!(
        catalog.parse(&["Patient"], "name:exact", "Chalmers").unwrap().to_string(),
        "(Param name (Equals String 'Chalmers'))"
    );
    assert_eq!(
        catalog.parse(&["Patient"], "family", "Smith,Jones").unwrap().to_string(),
        "(Param family (Or (StartsWithIgnoreCase String 'Smith') \
         (StartsWithIgnoreCase String 'Jones')))"
    );
}

#[test]
fn test_token_and_date_queries() {
    let catalog = default_catalog();

    assert_eq!(
        catalog
            .parse(&["Observation"], "code", "http://loinc.org|8480-6")
            .unwrap()
            .to_string(),
        "(Param code (And (Equals TokenSystem 'http://loinc.org') (Equals TokenCode '8480-6')))"
    );
    assert_eq!(
        catalog.parse(&["Patient"], "birthdate", "ge2020").unwrap().to_string(),
        "(Param birthdate (ge DateTimeEnd 2020-01-01T00:00:00.000Z))"
    );
    assert!(matches!(
        catalog.parse(&["Patient"], "gender:missing", "true").unwrap(),
        Expression::Missing { is_missing: true, .. }
    ));
    assert!(matches!(
        catalog.parse(&["Patient"], "gender:not", "male").unwrap(),
        Expression::Not(_)
    ));
}

#[test]
fn test_approximate_query_at_decimal_limit() {
    let catalog = default_catalog();
    assert!(matches!(
        catalog.parse(&["Observation"], "value-quantity", "ap79228162514264337593543950335"),
        Err(SearchError::InvalidSearchOperation { .. })
    ));
    assert!(catalog
        .parse(&["Observation"], "value-quantity", "ap100|http://unitsofmeasure.org|mg")
        .is_ok());
}

#[test]
fn test_chained_queries() {
    let catalog = default_catalog();

    assert_eq!(
        catalog.parse(&["Observation"], "patient.name", "Smith").unwrap().to_string(),
        "(Chain Observation patient Patient (Param name (StartsWithIgnoreCase String 'Smith')))"
    );

    let err = catalog
        .parse(&["Observation"], "subject.name", "Smith")
        .unwrap_err();
    assert!(matches!(err, SearchError::SearchOperationNotSupported { .. }));
    let message = err.to_string();
    assert!(message.contains("subject:Patient"));
    assert!(message.contains("subject:Location"));

    assert_eq!(
        catalog
            .parse(&["Observation"], "subject:Patient.name", "Smith")
            .unwrap()
            .to_string(),
        "(Chain Observation subject Patient (Param name (StartsWithIgnoreCase String 'Smith')))"
    );
}

#[test]
fn test_reverse_chained_query() {
    let catalog = default_catalog();
    assert_eq!(
        catalog
            .parse(&["Patient"], "_has:Observation:patient:code", "1234-5")
            .unwrap()
            .to_string(),
        "(ReverseChain Observation patient Patient (Param code (Equals TokenCode '1234-5')))"
    );
}

#[test]
fn test_includes() {
    let catalog = default_catalog();
    let parser = catalog.expression_parser();

    let Expression::Include {
        referenced_types,
        wildcard: true,
        ..
    } = parser.parse_include(&["Patient"], "*", false, false).unwrap()
    else {
        panic!("expected a wildcard include");
    };
    assert_eq!(
        referenced_types,
        vec!["Organization", "Practitioner", "PractitionerRole"]
    );

    let Expression::Include {
        parameter,
        target_type,
        ..
    } = parser
        .parse_include(&["Observation"], "Observation:performer:Practitioner", false, false)
        .unwrap()
    else {
        panic!("expected an include");
    };
    assert_eq!(target_type.as_deref(), Some("Practitioner"));
    assert_eq!(parameter.map(|p| p.code.clone()).as_deref(), Some("performer"));
}

#[test]
fn test_queries_follow_runtime_definitions() {
    let catalog = default_catalog();
    assert!(matches!(
        catalog.parse(&["Patient"], "nickname", "Bob"),
        Err(SearchError::ParameterNotSupported { .. })
    ));

    let parameter = helios_search::navigation::JsonElement::from_resource(search_parameter(
        "Patient-nickname",
        "nickname",
        "string",
        &["Patient"],
        "Patient.name.where(use = 'nickname').given",
    ))
    .into_node();
    catalog
        .registry()
        .add_new_search_parameters(&[parameter])
        .unwrap();

    assert!(catalog.parse(&["Patient"], "nickname", "Bob").is_ok());

    catalog
        .registry()
        .delete_search_parameter("http://example.org/SearchParameter/Patient-nickname")
        .unwrap();
    assert!(catalog.parse(&["Patient"], "nickname", "Bob").is_err());
}
