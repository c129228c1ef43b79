use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};

use crate::config::{Properties, StatusValues, non_empty};
use crate::error::SyncError;
use crate::model::{FieldValue, PropertyMap, ReadingStatus, SourceBookRecord};
use crate::repository::{DatabaseSchema, PropertyKind, PropertySchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Author,
    Status,
    CurrentPage,
    TotalPage,
    DateStarted,
    LastReadAt,
    DateFinished,
    Source,
    Cover,
    Genre,
    YearStarted,
    Rating,
}

impl Field {
    fn accepts(&self, kind: &PropertyKind) -> bool {
        use PropertyKind::*;
        match self {
            Field::Author => matches!(kind, RichText | Select),
            Field::Status => matches!(kind, Status | Select),
            Field::CurrentPage | Field::TotalPage => matches!(kind, Number),
            Field::DateStarted | Field::LastReadAt | Field::DateFinished => matches!(kind, Date),
            Field::Source => matches!(kind, MultiSelect | Select | RichText),
            Field::Cover => matches!(kind, Url | Files | RichText),
            Field::Genre => matches!(kind, Select | MultiSelect | RichText),
            Field::YearStarted => matches!(kind, Number | Select | MultiSelect | RichText),
            Field::Rating => matches!(kind, Number | Select | RichText),
        }
    }
}

#[derive(Debug, Clone)]
struct MappedField {
    field: Field,
    name: String,
    schema: PropertySchema,
}

/// Turns source records into target properties, using the configured column
/// names checked against the live database schema.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    title: String,
    fields: Vec<MappedField>,
    status_values: StatusValues,
}

impl FieldMapper {
    pub fn new(
        props: &Properties,
        status_values: &StatusValues,
        schema: &DatabaseSchema,
    ) -> Result<Self, SyncError> {
        let title = props.title.trim().to_string();
        match schema.get(&title) {
            Some(s) if s.kind == PropertyKind::Title => {}
            Some(s) => {
                return Err(SyncError::SchemaMismatch(format!(
                    "title property '{}' has type '{}', expected 'title'",
                    title,
                    s.kind.as_api()
                )));
            }
            None => return Err(missing_property(&title, schema)),
        }

        let candidates = [
            (Field::Author, &props.author),
            (Field::Status, &props.status),
            (Field::CurrentPage, &props.current_page),
            (Field::TotalPage, &props.total_page),
            (Field::DateStarted, &props.date_started),
            (Field::LastReadAt, &props.last_read_at),
            (Field::DateFinished, &props.date_finished),
            (Field::Source, &props.source),
            (Field::Cover, &props.cover),
            (Field::Genre, &props.genre),
            (Field::YearStarted, &props.year_started),
            (Field::Rating, &props.rating),
        ];

        let mut fields = Vec::new();
        for (field, name) in candidates {
            let Some(name) = non_empty(name) else {
                continue;
            };
            let schema_entry = schema.get(name).ok_or_else(|| missing_property(name, schema))?;
            if !field.accepts(&schema_entry.kind) {
                return Err(SyncError::SchemaMismatch(format!(
                    "property '{}' has unsupported type '{}'",
                    name,
                    schema_entry.kind.as_api()
                )));
            }
            fields.push(MappedField {
                field,
                name: name.to_string(),
                schema: schema_entry.clone(),
            });
        }

        Ok(FieldMapper {
            title,
            fields,
            status_values: status_values.clone(),
        })
    }

    pub fn title_property(&self) -> &str {
        &self.title
    }

    /// (column, type) pairs in mapping order, title first.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut out = vec![(self.title.clone(), "title".to_string())];
        out.extend(
            self.fields
                .iter()
                .map(|f| (f.name.clone(), f.schema.kind.as_api().to_string())),
        );
        out
    }

    pub fn status_label(&self, status: ReadingStatus) -> &str {
        match status {
            ReadingStatus::NotStarted => &self.status_values.not_started,
            ReadingStatus::InProgress => &self.status_values.in_progress,
            ReadingStatus::Finished => &self.status_values.finished,
        }
    }

    /// Full desired property set. Values the source does not know are left out.
    pub fn desired_fields(&self, record: &SourceBookRecord) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(self.title.clone(), FieldValue::Title(record.title.clone()));

        let status = record.status();
        for mapped in &self.fields {
            if let Some(value) = self.field_value(mapped, record, status) {
                props.insert(mapped.name.clone(), value);
            }
        }
        props
    }

    fn field_value(
        &self,
        mapped: &MappedField,
        record: &SourceBookRecord,
        status: ReadingStatus,
    ) -> Option<FieldValue> {
        let kind = &mapped.schema.kind;
        match mapped.field {
            Field::Author => {
                let author = record.author.trim();
                if author.is_empty() {
                    return None;
                }
                Some(text_like(kind, author))
            }
            Field::Status => {
                let label = self.status_label(status);
                let Some(option) = mapped.schema.match_option(label) else {
                    tracing::warn!(
                        property = %mapped.name,
                        value = %label,
                        options = ?mapped.schema.options,
                        "status value not among database options, skipping"
                    );
                    return None;
                };
                Some(match kind {
                    PropertyKind::Status => FieldValue::Status(option),
                    _ => FieldValue::Select(option),
                })
            }
            Field::CurrentPage => Some(FieldValue::Number(record.progress_current as f64)),
            Field::TotalPage => {
                (record.progress_total > 0).then(|| FieldValue::Number(record.progress_total as f64))
            }
            Field::DateStarted => record.started_at.map(|t| FieldValue::Date(local_date(t))),
            Field::LastReadAt => record.last_read_at.map(|t| FieldValue::Date(local_date(t))),
            Field::DateFinished => {
                if status != ReadingStatus::Finished {
                    return None;
                }
                record
                    .finished_at
                    .or(record.last_read_at)
                    .map(|t| FieldValue::Date(local_date(t)))
            }
            Field::Source => {
                let label = record.source.trim();
                if label.is_empty() {
                    return None;
                }
                Some(tag_like(kind, label))
            }
            Field::Cover => {
                let url = record.cover_url.as_deref()?.trim();
                if url.is_empty() {
                    return None;
                }
                Some(match kind {
                    PropertyKind::RichText => FieldValue::Text(url.to_string()),
                    _ => FieldValue::Url(url.to_string()),
                })
            }
            Field::Genre => {
                let genre = record.genre.as_deref()?.trim();
                if genre.is_empty() {
                    return None;
                }
                Some(tag_like(kind, genre))
            }
            Field::YearStarted => {
                let year = local_date(record.started_at?).year();
                Some(match kind {
                    PropertyKind::Number => FieldValue::Number(year as f64),
                    _ => tag_like(kind, &year.to_string()),
                })
            }
            Field::Rating => {
                let rating = record.rating?;
                Some(match kind {
                    PropertyKind::Number => FieldValue::Number(rating),
                    // options go in half-star steps
                    PropertyKind::Select => FieldValue::Select(((rating * 2.0).round() / 2.0).to_string()),
                    _ => FieldValue::Text(rating.to_string()),
                })
            }
        }
    }

    /// Adjusts desired values against what the page already holds. A book read
    /// on several platforms keeps every source tag instead of flip-flopping.
    pub fn reconcile(&self, desired: &mut PropertyMap, existing: &PropertyMap) {
        for mapped in self.fields.iter().filter(|f| f.field == Field::Source) {
            let (Some(FieldValue::MultiSelect(want)), Some(FieldValue::MultiSelect(have))) =
                (desired.get(&mapped.name), existing.get(&mapped.name))
            else {
                continue;
            };
            let mut merged = have.clone();
            for tag in want {
                if !merged.iter().any(|t| t == tag) {
                    merged.push(tag.clone());
                }
            }
            desired.insert(mapped.name.clone(), FieldValue::MultiSelect(merged));
        }
    }
}

fn text_like(kind: &PropertyKind, value: &str) -> FieldValue {
    match kind {
        PropertyKind::Select => FieldValue::Select(value.to_string()),
        _ => FieldValue::Text(value.to_string()),
    }
}

fn tag_like(kind: &PropertyKind, value: &str) -> FieldValue {
    match kind {
        PropertyKind::MultiSelect => FieldValue::MultiSelect(vec![value.to_string()]),
        _ => text_like(kind, value),
    }
}

fn missing_property(name: &str, schema: &DatabaseSchema) -> SyncError {
    let available: Vec<&str> = schema.keys().map(String::as_str).take(10).collect();
    SyncError::SchemaMismatch(format!(
        "property '{}' not found in database; available: {}",
        name,
        available.join(", ")
    ))
}

pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

/// Fields whose desired value differs from the page. The title is the lookup
/// key and never part of an update.
pub fn diff_fields(desired: &PropertyMap, existing: &PropertyMap, title_property: &str) -> PropertyMap {
    desired
        .iter()
        .filter(|(name, _)| name.as_str() != title_property)
        .filter(|(name, value)| !existing.get(*name).is_some_and(|current| current.same_as(value)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
