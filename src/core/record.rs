// Decoded result rows: ordered fields, each holding one or more ordered values.
use serde::ser::{Serialize, SerializeMap, Serializer};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Record {
    fields: Vec<Field>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Field {
    name: String,
    values: Vec<String>,
}

impl Record {
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// Values for `name` in decode order, or `None` when the row has no such field.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.values.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields
            .iter()
            .map(|field| (field.name.as_str(), field.values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RecordBuilder {
    fields: Vec<Field>,
}

impl RecordBuilder {
    /// Appends `value` to `name`, creating the field on first use.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => field.values.push(value),
            None => self.fields.push(Field {
                name,
                values: vec![value],
            }),
        }
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn build(self) -> Record {
        Record {
            fields: self.fields,
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            if let [single] = field.values.as_slice() {
                map.serialize_entry(&field.name, single)?;
            } else {
                map.serialize_entry(&field.name, &field.values)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::Record;

    #[test]
    fn absent_field_is_none_not_empty() {
        let record = Record::builder().value("host", "web-1").build();
        assert_eq!(record.get("host"), Some(&["web-1".to_string()][..]));
        assert!(record.get("source").is_none());
        assert!(!record.contains("source"));
    }

    #[test]
    fn multi_values_keep_decode_order() {
        let record = Record::builder()
            .value("tag", "b")
            .value("host", "web-1")
            .value("tag", "a")
            .build();
        assert_eq!(record.get("tag").unwrap(), ["b", "a"]);
        assert_eq!(record.fields().collect::<Vec<_>>(), ["tag", "host"]);
        assert_eq!(record.len(), 2);
        assert_eq!(record.first("tag"), Some("b"));
    }

    #[test]
    fn serializes_single_values_as_strings() {
        let record = Record::builder()
            .value("host", "web-1")
            .value("tag", "x")
            .value("tag", "y")
            .build();
        let json = serde_json::to_string(&record).expect("json");
        assert_eq!(json, r#"{"host":"web-1","tag":["x","y"]}"#);
    }
}
