use serde_json::{Map, Value, json};

use crate::blocks::{Block, BlockKind, ExistingBlock, MAX_TEXT_LEN, chunk_text, is_managed_type, signature};
use crate::error::SyncError;
use crate::model::{FieldValue, PropertyMap, TargetRecord};
use crate::repository::{DatabaseSchema, PropertyKind, PropertySchema};

pub fn rich_text(text: &str) -> Vec<Value> {
    chunk_text(text, MAX_TEXT_LEN)
        .into_iter()
        .map(|piece| json!({ "type": "text", "text": { "content": piece } }))
        .collect()
}

pub fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| {
                    p.get("plain_text")
                        .or_else(|| p.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

pub fn encode_value(value: &FieldValue, kind: &PropertyKind) -> Value {
    match value {
        FieldValue::Title(s) => json!({ "title": rich_text(s) }),
        FieldValue::Text(s) => json!({ "rich_text": rich_text(s) }),
        FieldValue::Number(n) => json!({ "number": n }),
        FieldValue::Date(d) => json!({ "date": { "start": d.format("%Y-%m-%d").to_string() } }),
        FieldValue::Select(s) => json!({ "select": { "name": s } }),
        FieldValue::Status(s) => json!({ "status": { "name": s } }),
        FieldValue::MultiSelect(items) => {
            let names: Vec<Value> = items.iter().map(|n| json!({ "name": n })).collect();
            json!({ "multi_select": names })
        }
        FieldValue::Url(url) => match kind {
            PropertyKind::Files => json!({
                "files": [{ "name": "cover", "type": "external", "external": { "url": url } }]
            }),
            _ => json!({ "url": url }),
        },
    }
}

pub fn encode_properties(props: &PropertyMap, schema: &DatabaseSchema) -> Value {
    let mut out = Map::new();
    for (name, value) in props {
        let kind = schema
            .get(name)
            .map(|s| s.kind.clone())
            .unwrap_or(PropertyKind::RichText);
        out.insert(name.clone(), encode_value(value, &kind));
    }
    Value::Object(out)
}

pub fn encode_block(block: &Block) -> Value {
    let api_type = block.kind.api_type();
    let mut body = json!({
        "rich_text": rich_text(&block.text),
        "color": block.color,
    });
    if let (BlockKind::Callout, Some(emoji)) = (block.kind, block.emoji) {
        body["icon"] = json!({ "type": "emoji", "emoji": emoji });
    }
    let mut out = Map::new();
    out.insert("object".to_string(), json!("block"));
    out.insert("type".to_string(), json!(api_type));
    out.insert(api_type.to_string(), body);
    Value::Object(out)
}

fn option_names(prop: &Value, kind: &str) -> Vec<String> {
    prop.get(kind)
        .and_then(|k| k.get("options"))
        .and_then(Value::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(|o| o.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decodes `GET /databases/{id}` into property name → type and options.
pub fn decode_schema(json: &Value) -> Result<DatabaseSchema, SyncError> {
    let props = json
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| SyncError::Parse("database response missing properties".to_string()))?;

    let mut schema = DatabaseSchema::new();
    for (name, prop) in props {
        let api_kind = prop.get("type").and_then(Value::as_str).unwrap_or_default();
        schema.insert(
            name.clone(),
            PropertySchema {
                kind: PropertyKind::from_api(api_kind),
                options: option_names(prop, api_kind),
            },
        );
    }
    Ok(schema)
}

fn decode_value(prop: &Value) -> Option<FieldValue> {
    let kind = prop.get("type").and_then(Value::as_str)?;
    let body = prop.get(kind)?;
    match kind {
        "title" => Some(FieldValue::Title(plain_text(body))),
        "rich_text" => {
            let text = plain_text(body);
            (!text.is_empty()).then_some(FieldValue::Text(text))
        }
        "number" => body.as_f64().map(FieldValue::Number),
        "date" => body
            .get("start")
            .and_then(Value::as_str)
            .and_then(|s| s.get(..10))
            .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(FieldValue::Date),
        "select" => body
            .get("name")
            .and_then(Value::as_str)
            .map(|s| FieldValue::Select(s.to_string())),
        "status" => body
            .get("name")
            .and_then(Value::as_str)
            .map(|s| FieldValue::Status(s.to_string())),
        "multi_select" => body.as_array().map(|items| {
            FieldValue::MultiSelect(
                items
                    .iter()
                    .filter_map(|i| i.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect(),
            )
        }),
        "url" => body.as_str().map(|s| FieldValue::Url(s.to_string())),
        "files" => body.as_array()?.first().and_then(|f| {
            f.get("external")
                .or_else(|| f.get("file"))
                .and_then(|x| x.get("url"))
                .and_then(Value::as_str)
                .map(|s| FieldValue::Url(s.to_string()))
        }),
        _ => None,
    }
}

pub fn decode_page(json: &Value) -> Result<TargetRecord, SyncError> {
    let id = json
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Parse("page response missing id".to_string()))?;

    let mut properties = PropertyMap::new();
    if let Some(props) = json.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            if let Some(value) = decode_value(prop) {
                properties.insert(name.clone(), value);
            }
        }
    }
    Ok(TargetRecord {
        id: id.to_string(),
        properties,
    })
}

/// Managed blocks from one page of `GET /blocks/{id}/children`, plus the
/// cursor for the next page.
pub fn decode_blocks(json: &Value) -> (Vec<ExistingBlock>, Option<String>) {
    let blocks = json
        .get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|b| {
                    let id = b.get("id").and_then(Value::as_str)?;
                    let api_type = b.get("type").and_then(Value::as_str)?;
                    if !is_managed_type(api_type) {
                        return None;
                    }
                    let text = b
                        .get(api_type)
                        .and_then(|body| body.get("rich_text"))
                        .map(plain_text)
                        .unwrap_or_default();
                    Some(ExistingBlock {
                        id: id.to_string(),
                        signature: signature(api_type, &text),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let next = if json.get("has_more").and_then(Value::as_bool).unwrap_or(false) {
        json.get("next_cursor").and_then(Value::as_str).map(str::to_string)
    } else {
        None
    };
    (blocks, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_encode_cover_by_column_type() {
        let url = FieldValue::Url("https://img/x.jpg".into());
        assert_eq!(encode_value(&url, &PropertyKind::Url), json!({ "url": "https://img/x.jpg" }));
        let files = encode_value(&url, &PropertyKind::Files);
        assert_eq!(files["files"][0]["external"]["url"], "https://img/x.jpg");
    }

    #[test]
    fn test_encode_date_and_status() {
        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(
            encode_value(&date, &PropertyKind::Date),
            json!({ "date": { "start": "2024-03-09" } })
        );
        let status = FieldValue::Status("Read".into());
        assert_eq!(
            encode_value(&status, &PropertyKind::Status),
            json!({ "status": { "name": "Read" } })
        );
    }

    #[test]
    fn test_decode_schema_with_options() {
        let body = json!({
            "properties": {
                "Name": { "type": "title", "title": {} },
                "Status": { "type": "status", "status": { "options": [{ "name": "Read" }, { "name": "To Be Read" }] } },
                "Rating": { "type": "formula", "formula": {} }
            }
        });
        let schema = decode_schema(&body).unwrap();
        assert_eq!(schema["Name"].kind, PropertyKind::Title);
        assert_eq!(schema["Status"].options, vec!["Read", "To Be Read"]);
        assert_eq!(schema["Rating"].kind, PropertyKind::Other("formula".into()));
    }

    #[test]
    fn test_decode_page_properties() {
        let page = json!({
            "id": "page-1",
            "properties": {
                "Name": { "type": "title", "title": [{ "plain_text": "三体" }] },
                "Current Page": { "type": "number", "number": 40 },
                "Total Page": { "type": "number", "number": null },
                "Last Read At": { "type": "date", "date": { "start": "2024-03-10T08:00:00.000+08:00" } },
                "Source": { "type": "multi_select", "multi_select": [{ "name": "WeRead" }] },
                "Author": { "type": "rich_text", "rich_text": [] }
            }
        });
        let record = decode_page(&page).unwrap();
        assert_eq!(record.id, "page-1");
        assert_eq!(record.properties["Name"], FieldValue::Title("三体".into()));
        assert_eq!(record.properties["Current Page"], FieldValue::Number(40.0));
        assert!(!record.properties.contains_key("Total Page"));
        assert!(!record.properties.contains_key("Author"));
        assert_eq!(
            record.properties["Last Read At"],
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())
        );
    }

    #[test]
    fn test_decode_blocks_skips_user_content() {
        let body = json!({
            "results": [
                { "id": "a", "type": "callout", "callout": { "rich_text": [{ "plain_text": "passage" }] } },
                { "id": "b", "type": "paragraph", "paragraph": { "rich_text": [{ "plain_text": "mine" }] } }
            ],
            "has_more": true,
            "next_cursor": "cur-2"
        });
        let (blocks, next) = decode_blocks(&body);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].signature, Block::callout("passage", None, None, false).signature());
        assert_eq!(next.as_deref(), Some("cur-2"));
    }

    #[test]
    fn test_encode_callout_carries_icon() {
        let v = encode_block(&Block::callout("x", Some(0), Some(3), false));
        assert_eq!(v["type"], "callout");
        assert_eq!(v["callout"]["color"], "blue");
        assert_eq!(v["callout"]["icon"]["emoji"], "💡");
    }
}
