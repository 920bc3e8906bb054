use std::collections::BTreeMap;

/// Maps a class index to the label the model was trained with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames {
    names: BTreeMap<usize, String>,
}

impl ClassNames {
    pub fn from_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).enumerate().collect(),
        }
    }

    /// Placeholder names `class0..classN` for models exported without metadata.
    pub fn generic(count: usize) -> Self {
        Self::from_list((0..count).map(|i| format!("class{i}")))
    }

    /// Parses the `names` entry Ultralytics stores in the ONNX metadata,
    /// e.g. `{0: 'pothole', 1: "road crack"}`.
    pub fn from_metadata(raw: &str) -> Option<Self> {
        let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
        let mut names = BTreeMap::new();
        let mut rest = body.trim_start();

        while !rest.is_empty() {
            let colon = rest.find(':')?;
            let index: usize = rest[..colon].trim().parse().ok()?;
            rest = rest[colon + 1..].trim_start();

            let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
            let value = &rest[1..];
            let end = value.find(quote)?;
            names.insert(index, value[..end].to_string());

            rest = value[end + 1..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        if names.is_empty() {
            None
        } else {
            Some(Self { names })
        }
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}
