use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ScraperError;

/// The named fields a detail page is mined for. `SourceUrl` is set at record
/// creation and never extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CompanyName,
    FoundingDate,
    Region,
    City,
    Description,
    Email,
    Phone,
    Website,
}

/// One row of output. Empty string means the field was not found on the
/// page, which is expected and not an error.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub company_name: String,
    pub founding_date: String,
    pub region: String,
    pub city: String,
    pub description: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub source_url: String,
    /// Attached documents (PDFs etc.) found on the page; downloaded as a
    /// side effect, not a CSV column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_urls: Vec<String>,
}

impl CompanyRecord {
    pub fn new(source_url: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        match field {
            Field::CompanyName => self.company_name = value,
            Field::FoundingDate => self.founding_date = value,
            Field::Region => self.region = value,
            Field::City => self.city = value,
            Field::Description => self.description = value,
            Field::Email => self.email = value,
            Field::Phone => self.phone = value,
            Field::Website => self.website = value,
        }
    }

    /// True when every extracted field is empty (source URL excluded).
    pub fn is_empty(&self) -> bool {
        self.company_name.is_empty()
            && self.founding_date.is_empty()
            && self.region.is_empty()
            && self.city.is_empty()
            && self.description.is_empty()
            && self.email.is_empty()
            && self.phone.is_empty()
            && self.website.is_empty()
    }
}

/// Fixed output column order.
pub const CSV_HEADER: &[&str] = &[
    "company_name",
    "founding_date",
    "region",
    "city",
    "description",
    "email",
    "phone",
    "website",
    "source_url",
];

/// Append-only CSV sink. The header is written exactly once, at
/// construction; every completed record becomes one row.
pub struct RecordSink<W: Write> {
    writer: csv::Writer<W>,
}

impl RecordSink<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ScraperError> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> RecordSink<W> {
    pub fn from_writer(inner: W) -> Result<Self, ScraperError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(CSV_HEADER)?;
        Ok(Self { writer })
    }

    pub fn append(&mut self, record: &CompanyRecord) -> Result<(), ScraperError> {
        self.writer.write_record([
            record.company_name.as_str(),
            record.founding_date.as_str(),
            record.region.as_str(),
            record.city.as_str(),
            record.description.as_str(),
            record.email.as_str(),
            record.phone.as_str(),
            record.website.as_str(),
            record.source_url.as_str(),
        ])?;
        // Flush per record so a crash mid-run loses at most the row in flight.
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ScraperError> {
        self.writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|e| panic!("CSV writer flush failed: {}", e))
    }
}
