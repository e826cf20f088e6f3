use smartorder_core::ParsedOrderDraft;

use crate::error::ParseError;

/// Reads a draft from model output, tolerating prose around the JSON
/// object. Drafts with non-positive quantities are rejected.
pub fn parse_draft(response: &str) -> Result<ParsedOrderDraft, ParseError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => return Err(ParseError::MalformedResponse("no JSON object in response".to_string())),
    };

    let draft: ParsedOrderDraft =
        serde_json::from_str(json).map_err(|err| ParseError::MalformedResponse(err.to_string()))?;
    if !draft.is_well_formed() {
        return Err(ParseError::MalformedResponse(
            "every product needs an identifier and a quantity of at least 1".to_string(),
        ));
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_prose() {
        let response = r#"Вот результат:
{"products":[{"articul":"ФР-00000001","name":"Плита","quantity":2}],"customer":{"name":"Иван"},"missing_data":["phone"]}
Спасибо!"#;

        let draft = parse_draft(response).unwrap();

        assert_eq!(draft.products[0].quantity, 2);
        assert_eq!(draft.customer.name.as_deref(), Some("Иван"));
        assert_eq!(draft.missing_data, vec!["phone".to_string()]);
    }

    #[test]
    fn malformed_json_is_a_parse_failure() {
        assert!(matches!(parse_draft("not json"), Err(ParseError::MalformedResponse(_))));
        assert!(matches!(parse_draft("{\"products\": [}"), Err(ParseError::MalformedResponse(_))));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let response = r#"{"products":[{"articul":"ФР-00000001","name":"Плита","quantity":0}]}"#;
        assert!(parse_draft(response).is_err());
    }
}
