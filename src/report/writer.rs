//! Delimited report file, created on the first row
//!
//! Nothing touches the filesystem until a row is written, so an empty report
//! leaves no file behind.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct ReportFile {
    path: PathBuf,
    delimiter: char,
    header: &'static [&'static str],
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

impl ReportFile {
    pub fn new(path: impl AsRef<Path>, delimiter: char, header: &'static [&'static str]) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter,
            header,
            writer: None,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append one row, creating the file and its header first if needed
    pub fn write_row<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        if self.writer.is_none() {
            self.open()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            write_delimited(writer, self.delimiter, fields)?;
            self.rows_written += 1;
        }
        Ok(())
    }

    /// Push buffered rows to disk; called once per page
    pub fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and close; returns the path if anything was written
    pub fn finish(mut self) -> io::Result<Option<PathBuf>> {
        self.flush()?;
        match self.writer.take() {
            Some(_) => Ok(Some(self.path)),
            None => Ok(None),
        }
    }

    fn open(&mut self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(&self.path)?);
        write_delimited(&mut writer, self.delimiter, self.header)?;
        log::debug!("Report file created: {}", self.path.display());

        self.writer = Some(writer);
        Ok(())
    }
}

fn write_delimited<W: Write, S: AsRef<str>>(writer: &mut W, delimiter: char, fields: &[S]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            write!(writer, "{}", delimiter)?;
        }
        writer.write_all(field.as_ref().as_bytes())?;
    }
    writer.write_all(b"\n")
}
