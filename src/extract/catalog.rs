use std::{
    collections::BTreeMap,
    io::BufRead,
    path::{Path, PathBuf},
};

use quick_xml::{events::Event as XmlEvent, Reader};
use rusqlite::{params, Connection};

use crate::db::helpers::table_exists;
use crate::error::{DdtError, ExtractionError, Result};

/// Code -> descriptive text, read from an archive's text dictionary.
///
/// Codes are the decimal `index` values of the dictionary. Catalogs from several
/// archives of one session are expected to agree; [`MetadataCatalog::absorb`]
/// refuses to paper over a disagreement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataCatalog {
    entries: BTreeMap<String, String>,
    sources: Vec<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Index,
    Text,
}

impl MetadataCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(code, text)| (code.into(), text.into()))
                .collect(),
            sources: Vec::new(),
        }
    }

    /// Parses `<item><index>N</index><text>..</text></item>` elements at any depth.
    /// Items whose index is not an integer are skipped.
    pub fn parse<R: BufRead>(reader: R, source: &Path) -> std::result::Result<Self, ExtractionError> {
        let mut xml = Reader::from_reader(reader);
        xml.config_mut().trim_text(true);

        let mut entries = BTreeMap::new();
        let mut buf = Vec::new();
        let mut in_item = false;
        let mut field = Field::None;
        let mut index = String::new();
        let mut text = String::new();

        loop {
            match xml.read_event_into(&mut buf) {
                Ok(XmlEvent::Start(e)) => match e.name().as_ref() {
                    b"item" => {
                        in_item = true;
                        index.clear();
                        text.clear();
                    }
                    b"index" if in_item => field = Field::Index,
                    b"text" if in_item => field = Field::Text,
                    _ => {}
                },
                Ok(XmlEvent::Text(e)) => {
                    let value = e.unescape().map_err(|err| {
                        ExtractionError::Corrupt(format!("{}: {err}", source.display()))
                    })?;
                    match field {
                        Field::Index => index.push_str(&value),
                        Field::Text => text.push_str(&value),
                        Field::None => {}
                    }
                }
                Ok(XmlEvent::CData(e)) => {
                    if field == Field::Text {
                        text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(XmlEvent::End(e)) => match e.name().as_ref() {
                    b"item" if in_item => {
                        if let Ok(code) = index.trim().parse::<i64>() {
                            entries.insert(code.to_string(), std::mem::take(&mut text));
                        }
                        in_item = false;
                        field = Field::None;
                    }
                    b"index" | b"text" => field = Field::None,
                    _ => {}
                },
                Ok(XmlEvent::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(ExtractionError::Corrupt(format!(
                        "{} at byte {}: {err}",
                        source.display(),
                        xml.buffer_position()
                    )))
                }
            }
            buf.clear();
        }

        Ok(Self {
            entries,
            sources: vec![source.to_path_buf()],
        })
    }

    pub fn load(path: &Path) -> std::result::Result<Self, ExtractionError> {
        let file = std::fs::File::open(path)?;
        Self::parse(std::io::BufReader::new(file), path)
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.entries.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Files the entries were read from.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Folds another archive's catalog into this one. Identical entries are
    /// shared; the same code with different text is a [`DdtError::CatalogConflict`].
    pub fn absorb(&mut self, other: MetadataCatalog) -> Result<()> {
        let source_path = other.sources.first().cloned().unwrap_or_default();
        for (code, text) in &other.entries {
            if let Some(existing) = self.entries.get(code) {
                if existing != text {
                    return Err(DdtError::CatalogConflict {
                        code: code.clone(),
                        source_path,
                    });
                }
            }
        }
        self.entries.extend(other.entries);
        self.sources.extend(other.sources);
        Ok(())
    }

    /// Writes the entries into the merged dataset's `_ddt_catalog` table.
    pub(crate) fn store(&self, conn: &Connection) -> Result<()> {
        let mut stmt =
            conn.prepare("INSERT OR REPLACE INTO _ddt_catalog (code, text) VALUES (?1, ?2)")?;
        for (code, text) in &self.entries {
            stmt.execute(params![code, text])?;
        }
        Ok(())
    }

    pub(crate) fn load_from(conn: &Connection) -> Result<Self> {
        if !table_exists(conn, "main", "_ddt_catalog")? {
            return Ok(Self::new());
        }
        let mut stmt = conn.prepare("SELECT code, text FROM _ddt_catalog")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let entries = rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            entries,
            sources: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICTIONARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<textDic>
  <language id="en">
    <item><index>101</index><text>Haulage overload %d A</text></item>
    <item><index>102</index><text>Motor &amp; pump</text></item>
    <item><index>oops</index><text>ignored</text></item>
    <item><index>103</index><text><![CDATA[<b>Check</b> cable]]></text></item>
    <item><index>104</index><text/></item>
  </language>
</textDic>"#;

    fn parse(xml: &str, name: &str) -> MetadataCatalog {
        MetadataCatalog::parse(xml.as_bytes(), Path::new(name)).unwrap()
    }

    #[test]
    fn parses_nested_items() {
        let catalog = parse(DICTIONARY, "textDic_en.xml");
        assert_eq!(catalog.get("101"), Some("Haulage overload %d A"));
        assert_eq!(catalog.get("102"), Some("Motor & pump"));
        assert_eq!(catalog.get("103"), Some("<b>Check</b> cable"));
        assert_eq!(catalog.get("104"), Some(""));
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.sources(), &[PathBuf::from("textDic_en.xml")]);
    }

    #[test]
    fn malformed_xml_is_corrupt() {
        let result = MetadataCatalog::parse("<item><index>1</text></item>".as_bytes(), Path::new("x"));
        assert!(matches!(result, Err(ExtractionError::Corrupt(_))));
    }

    #[test]
    fn absorb_accepts_agreeing_catalogs() {
        let mut catalog = parse(DICTIONARY, "a.xml");
        let other = parse(
            "<r><item><index>101</index><text>Haulage overload %d A</text></item>\
             <item><index>200</index><text>New</text></item></r>",
            "b.xml",
        );
        catalog.absorb(other).unwrap();
        assert_eq!(catalog.get("200"), Some("New"));
        assert_eq!(catalog.sources().len(), 2);
    }

    #[test]
    fn absorb_rejects_disagreement() {
        let mut catalog = parse(DICTIONARY, "a.xml");
        let other = parse("<r><item><index>101</index><text>Different</text></item></r>", "b.xml");
        match catalog.absorb(other) {
            Err(DdtError::CatalogConflict { code, source_path }) => {
                assert_eq!(code, "101");
                assert_eq!(source_path, PathBuf::from("b.xml"));
            }
            other => panic!("expected catalog conflict, got {other:?}"),
        }
        assert_eq!(catalog.get("101"), Some("Haulage overload %d A"));
    }

    #[test]
    fn stores_and_loads_through_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE _ddt_catalog (code TEXT PRIMARY KEY, text TEXT NOT NULL)")
            .unwrap();
        let catalog = parse(DICTIONARY, "a.xml");
        catalog.store(&conn).unwrap();
        let loaded = MetadataCatalog::load_from(&conn).unwrap();
        assert_eq!(loaded.get("102"), Some("Motor & pump"));
        assert_eq!(loaded.len(), catalog.len());
    }
}
