//! Recipient descriptors.
//!
//! A campaign's recipient list is stored exactly as submitted. Entries are
//! either a bare address string or an object carrying the address under one
//! of several field names, optionally with a display name and per-recipient
//! body or media overrides.

use serde_json::{Map, Value};

use crate::error::CampaignError;

/// Object fields that may hold the address, in lookup order.
const ADDRESS_FIELDS: [&str; 4] = ["phone", "address", "number", "jid"];

/// Placeholder replaced by the recipient's name.
const NAME_PLACEHOLDER: &str = "{{name}}";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipient {
    /// `None` when the descriptor carries no usable address. Delivery to
    /// such a recipient fails without aborting the campaign.
    pub address: Option<String>,
    pub name: Option<String>,
    pub body: Option<String>,
    pub media: Option<String>,
}

impl Recipient {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(address) => Self::bare(address),
            Value::Number(number) => Self::bare(&number.to_string()),
            Value::Object(fields) => Self::from_object(fields),
            _ => Self::default(),
        }
    }

    fn bare(address: &str) -> Self {
        Self {
            address: non_empty(address),
            ..Self::default()
        }
    }

    fn from_object(fields: &Map<String, Value>) -> Self {
        let address = ADDRESS_FIELDS
            .iter()
            .find_map(|key| match fields.get(*key) {
                Some(Value::String(s)) => non_empty(s),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str).and_then(non_empty))
        };
        Self {
            address,
            name: text(&["name"]),
            body: text(&["body", "message"]),
            media: text(&["media", "mediaUrl", "media_url"]),
        }
    }

    /// Message text for this recipient: its own body if it has one,
    /// otherwise the campaign template, with the name placeholder filled in.
    pub fn render_body(&self, template: &str) -> String {
        let body = self.body.as_deref().unwrap_or(template);
        if body.contains(NAME_PLACEHOLDER) {
            body.replace(NAME_PLACEHOLDER, self.name.as_deref().unwrap_or_default())
        } else {
            body.to_string()
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Parse a stored recipient list.
///
/// Accepts an array, or a string holding a JSON array. Anything else makes
/// the whole campaign fail.
pub fn parse(value: &Value) -> Result<Vec<Recipient>, CampaignError> {
    match value {
        Value::Array(items) => Ok(items.iter().map(Recipient::from_value).collect()),
        Value::String(raw) => {
            let decoded: Value = serde_json::from_str(raw)
                .map_err(|e| CampaignError::MalformedRecipients(e.to_string()))?;
            match decoded {
                Value::Array(items) => Ok(items.iter().map(Recipient::from_value).collect()),
                _ => Err(CampaignError::MalformedRecipients(
                    "expected a JSON array".into(),
                )),
            }
        },
        other => Err(CampaignError::MalformedRecipients(format!(
            "expected an array, got {}",
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn bare_and_structured_resolve_alike() {
        let list = parse(&json!([
            "15550001",
            {"phone": "15550002"},
            {"number": 15550003},
            {"jid": "12036302@g.us", "name": "Team"},
        ]))
        .unwrap();
        let addresses: Vec<_> = list.iter().map(|r| r.address.as_deref()).collect();
        assert_eq!(addresses, vec![
            Some("15550001"),
            Some("15550002"),
            Some("15550003"),
            Some("12036302@g.us"),
        ]);
        assert_eq!(list[3].name.as_deref(), Some("Team"));
    }

    #[test]
    fn json_string_lists_are_accepted() {
        let list = parse(&json!(r#"["15550001", {"phone": "15550002"}]"#)).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn missing_address_is_per_recipient() {
        let list = parse(&json!([{"name": "nobody"}, null, ""])).unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|r| r.address.is_none()));
    }

    #[test]
    fn non_lists_are_malformed() {
        for value in [json!({"phone": "1"}), json!(42), json!("not json"), json!(null)] {
            assert!(matches!(
                parse(&value),
                Err(CampaignError::MalformedRecipients(_))
            ));
        }
    }

    #[test]
    fn body_overrides_and_name_placeholder() {
        let list = parse(&json!([
            {"phone": "1", "name": "Ana"},
            {"phone": "2", "body": "Custom for {{name}}", "name": "Bo"},
            "3",
        ]))
        .unwrap();
        let template = "Hi {{name}}!";
        assert_eq!(list[0].render_body(template), "Hi Ana!");
        assert_eq!(list[1].render_body(template), "Custom for Bo");
        assert_eq!(list[2].render_body(template), "Hi !");
        assert_eq!(list[2].render_body("plain"), "plain");
    }
}
