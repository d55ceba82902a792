//! Export payload archives
//!
//! A dataset download is a zip archive that must hold exactly one entry, the
//! CSV body. Anything else is a structural fault in the upstream export and
//! fails with [`Error::MalformedArchive`] before any load is attempted.

use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::Error;

/// UTF-8 byte-order mark
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A validated single-entry export archive
pub struct CsvArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entry_name: String,
}

impl CsvArchive {
    /// Open an archive and check it holds exactly one entry
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::malformed_archive(format!("not a zip archive: {}", e)))?;

        if archive.len() != 1 {
            return Err(Error::malformed_archive(format!(
                "expected exactly one entry, found {}",
                archive.len()
            )));
        }

        let entry_name = archive
            .by_index(0)
            .map_err(|e| Error::malformed_archive(format!("unreadable entry: {}", e)))?
            .name()
            .to_string();

        Ok(Self {
            archive,
            entry_name,
        })
    }

    /// Name of the single entry
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Stream the entry's CSV text with any leading BOM removed
    pub fn csv_reader(&mut self) -> Result<impl Read + '_, Error> {
        let entry = self
            .archive
            .by_index(0)
            .map_err(|e| Error::malformed_archive(format!("unreadable entry: {}", e)))?;

        Ok(strip_bom(entry)?)
    }
}

impl std::fmt::Debug for CsvArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvArchive")
            .field("entry_name", &self.entry_name)
            .finish()
    }
}

/// Drop a leading UTF-8 BOM, leaving every other byte untouched
pub fn strip_bom<R: Read>(mut reader: R) -> std::io::Result<impl Read> {
    let mut prefix = Vec::with_capacity(UTF8_BOM.len());
    (&mut reader)
        .take(UTF8_BOM.len() as u64)
        .read_to_end(&mut prefix)?;

    if prefix == UTF8_BOM {
        prefix.clear();
    }

    Ok(Cursor::new(prefix).chain(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn read_all(archive: &mut CsvArchive) -> String {
        let mut text = String::new();
        archive
            .csv_reader()
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn single_entry_is_readable() {
        let mut archive = CsvArchive::from_bytes(zip_with(&[("Users.csv", "id\n1\n")])).unwrap();
        assert_eq!(archive.entry_name(), "Users.csv");
        assert_eq!(read_all(&mut archive), "id\n1\n");
    }

    #[test]
    fn empty_archive_is_malformed() {
        let result = CsvArchive::from_bytes(zip_with(&[]));
        assert!(matches!(result, Err(Error::MalformedArchive(_))));
    }

    #[test]
    fn two_entries_are_malformed() {
        let result = CsvArchive::from_bytes(zip_with(&[("a.csv", "x"), ("b.csv", "y")]));
        assert!(matches!(result, Err(Error::MalformedArchive(_))));
    }

    #[test]
    fn non_zip_payload_is_malformed() {
        let result = CsvArchive::from_bytes(b"<html>maintenance</html>".to_vec());
        assert!(matches!(result, Err(Error::MalformedArchive(_))));
    }

    #[test]
    fn bom_is_stripped() {
        let mut archive =
            CsvArchive::from_bytes(zip_with(&[("a.csv", "\u{FEFF}id,name\n1,x\n")])).unwrap();
        assert_eq!(read_all(&mut archive), "id,name\n1,x\n");
    }

    #[test]
    fn strip_bom_passes_through_short_and_plain_input() {
        for input in [&b""[..], b"i", b"id", b"id,name\n"] {
            let mut out = Vec::new();
            strip_bom(input).unwrap().read_to_end(&mut out).unwrap();
            assert_eq!(out, input);
        }
    }

    #[test]
    fn strip_bom_only_removes_a_leading_mark() {
        let mut out = Vec::new();
        strip_bom(&b"a\xEF\xBB\xBFb"[..])
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"a\xEF\xBB\xBFb");
    }
}
