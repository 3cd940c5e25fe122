//! Binary build-event log
//!
//! The build engine writes a gzip-compressed stream of length-delimited
//! records. Only three views are extracted:
//!
//! - the source files captured in the embedded project-import archive,
//! - the names of targets that started,
//! - the properties reported when project evaluation finished.
//!
//! ## Container
//!
//! ```text
//! gzip(
//!   i32 LE  file format version (>= 18: records are length-prefixed)
//!   i32 LE  minimum reader version
//!   record* (7-bit kind, 7-bit payload length, payload)
//!   kind 0  end of file
//! )
//! ```
//!
//! Strings and name/value lists are emitted once as their own records and
//! referenced by index afterwards. A string record's payload is itself a
//! 7-bit length followed by UTF-8 bytes. String index 0 is null, 1 is the
//! empty string, and `n >= 10` refers to the `(n - 10)`th string record.
//! Name/value lists are numbered the same way from 10; index 0 means
//! "no list".
//!
//! Record kinds without a view are skipped using their length prefix. A
//! known record whose payload cannot be decoded is skipped as well, so
//! newer writers that extend a record do not break the decoder; only a
//! broken container or broken record framing is an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ReportError;

/// Oldest format whose records carry a length prefix.
pub const MIN_FORMAT_VERSION: i32 = 18;

/// Format version written by [`LogWriter`].
pub const WRITER_FORMAT_VERSION: i32 = 25;

mod kind {
    pub const END_OF_FILE: u32 = 0;
    pub const TARGET_STARTED: u32 = 5;
    pub const PROJECT_EVALUATION_FINISHED: u32 = 15;
    pub const PROJECT_IMPORT_ARCHIVE: u32 = 17;
    pub const NAME_VALUE_LIST: u32 = 23;
    pub const STRING: u32 = 24;
}

/// Flags announcing which base event fields follow.
mod fields {
    pub const BUILD_EVENT_CONTEXT: u32 = 1 << 0;
    pub const HELP_KEYWORD: u32 = 1 << 1;
    pub const MESSAGE: u32 = 1 << 2;
    pub const SENDER_NAME: u32 = 1 << 3;
    pub const THREAD_ID: u32 = 1 << 4;
    pub const TIMESTAMP: u32 = 1 << 5;
    pub const SUBCATEGORY: u32 = 1 << 6;
    pub const CODE: u32 = 1 << 7;
    pub const FILE: u32 = 1 << 8;
    pub const PROJECT_FILE: u32 = 1 << 9;
    pub const LINE_NUMBER: u32 = 1 << 10;
    pub const COLUMN_NUMBER: u32 = 1 << 11;
    pub const END_LINE_NUMBER: u32 = 1 << 12;
    pub const END_COLUMN_NUMBER: u32 = 1 << 13;
    pub const ARGUMENTS: u32 = 1 << 14;
    pub const IMPORTANCE: u32 = 1 << 15;

    /// Everything but the extended-data block.
    pub const KNOWN: u32 = (1 << 16) - 1;

    /// Optional string fields, in stream order after the timestamp.
    pub const STRINGS: [u32; 4] = [SUBCATEGORY, CODE, FILE, PROJECT_FILE];
    /// Optional integer fields, in stream order after the strings.
    pub const POSITIONS: [u32; 4] = [LINE_NUMBER, COLUMN_NUMBER, END_LINE_NUMBER, END_COLUMN_NUMBER];
}

const FIRST_STRING_INDEX: u32 = 10;
const FIRST_LIST_INDEX: u32 = 10;

/// The decoded views of one build event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEventLog {
    pub format_version: i32,
    /// Full paths of every source file the build captured.
    pub source_files: BTreeSet<PathBuf>,
    /// Names of every target that started.
    pub targets: BTreeSet<String>,
    /// Evaluated properties; a later evaluation overwrites earlier values.
    pub properties: BTreeMap<String, String>,
}

impl BuildEventLog {
    pub fn is_target_executed(&self, target: &str) -> bool {
        self.targets.contains(target)
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn contains_source_file(&self, path: impl AsRef<Path>) -> bool {
        self.source_files.contains(path.as_ref())
    }
}

/// Turns raw event-log bytes into a [`BuildEventLog`].
pub trait EventLogDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<BuildEventLog, ReportError>;
}

/// Decoder for the build engine's native binary log.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinlogDecoder;

impl EventLogDecoder for BinlogDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<BuildEventLog, ReportError> {
        decode(bytes)
    }
}

/// Decode a complete gzip-compressed log.
pub fn decode(bytes: &[u8]) -> Result<BuildEventLog, ReportError> {
    let mut raw = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|err| ReportError::InvalidEventLog(format!("gzip: {err}")))?;

    let mut reader = Reader::new(&raw);
    let version = reader.read_i32()?;
    if version < MIN_FORMAT_VERSION {
        return Err(ReportError::UnsupportedEventLogVersion {
            version,
            minimum: MIN_FORMAT_VERSION,
        });
    }
    let _min_reader_version = reader.read_i32()?;

    let mut state = DecodeState::default();
    let mut log = BuildEventLog {
        format_version: version,
        ..Default::default()
    };

    while !reader.is_empty() {
        let kind = reader.read_7bit()?;
        if kind == kind::END_OF_FILE {
            break;
        }
        let length = reader.read_7bit()? as usize;
        let payload = reader.read_bytes(length)?;

        match kind {
            kind::STRING => state.strings.push(read_string_record(payload)?),
            kind::NAME_VALUE_LIST => {
                let list = state.read_name_value_list(&mut Reader::new(payload))?;
                state.lists.push(list);
            }
            kind::TARGET_STARTED => match state.read_target_started(&mut Reader::new(payload)) {
                Ok(Some(target)) => {
                    log.targets.insert(target);
                }
                Ok(None) => {}
                Err(err) => debug!(error = %err, "skipping undecodable target record"),
            },
            kind::PROJECT_EVALUATION_FINISHED => {
                match state.read_evaluation_finished(&mut Reader::new(payload)) {
                    Ok(properties) => log.properties.extend(properties),
                    Err(err) => debug!(error = %err, "skipping undecodable evaluation record"),
                }
            }
            kind::PROJECT_IMPORT_ARCHIVE => {
                log.source_files.extend(archive_source_files(payload)?);
            }
            _ => {}
        }
    }

    Ok(log)
}

/// Body of a string record: 7-bit byte count, then UTF-8.
///
/// A broken string record is fatal: skipping it would shift every later index.
fn read_string_record(payload: &[u8]) -> Result<String, ReportError> {
    let mut reader = Reader::new(payload);
    let len = reader.read_7bit()? as usize;
    let bytes = reader
        .read_bytes(len)
        .map_err(|err| ReportError::InvalidEventLog(format!("string record: {err}")))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[derive(Default)]
struct DecodeState {
    strings: Vec<String>,
    lists: Vec<Vec<(String, String)>>,
}

impl DecodeState {
    fn string(&self, index: u32) -> Result<Option<String>, ReportError> {
        match index {
            0 => Ok(None),
            1 => Ok(Some(String::new())),
            n if n >= FIRST_STRING_INDEX => self
                .strings
                .get((n - FIRST_STRING_INDEX) as usize)
                .cloned()
                .map(Some)
                .ok_or_else(|| ReportError::InvalidEventLog(format!("string index {n} out of range"))),
            n => Err(ReportError::InvalidEventLog(format!("reserved string index {n}"))),
        }
    }

    fn read_string(&self, reader: &mut Reader<'_>) -> Result<Option<String>, ReportError> {
        let index = reader.read_7bit()?;
        self.string(index)
    }

    fn read_name_value_list(
        &self,
        reader: &mut Reader<'_>,
    ) -> Result<Vec<(String, String)>, ReportError> {
        let count = reader.read_7bit()?;
        let mut list = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let name = self.read_string(reader)?.unwrap_or_default();
            let value = self.read_string(reader)?.unwrap_or_default();
            list.push((name, value));
        }
        Ok(list)
    }

    fn list(&self, index: u32) -> Result<&[(String, String)], ReportError> {
        match index {
            0 => Ok(&[]),
            n if n >= FIRST_LIST_INDEX => self
                .lists
                .get((n - FIRST_LIST_INDEX) as usize)
                .map(Vec::as_slice)
                .ok_or_else(|| ReportError::InvalidEventLog(format!("name/value list {n} out of range"))),
            n => Err(ReportError::InvalidEventLog(format!("reserved list index {n}"))),
        }
    }

    fn skip_base_fields(&self, reader: &mut Reader<'_>, importance: bool) -> Result<(), ReportError> {
        let flags = reader.read_7bit()?;
        if flags & !fields::KNOWN != 0 {
            return Err(ReportError::InvalidEventLog(format!(
                "unsupported event fields {flags:#x}"
            )));
        }
        if flags & fields::MESSAGE != 0 {
            self.read_string(reader)?;
        }
        if flags & fields::BUILD_EVENT_CONTEXT != 0 {
            for _ in 0..7 {
                reader.read_7bit()?;
            }
        }
        if flags & fields::THREAD_ID != 0 {
            reader.read_7bit()?;
        }
        if flags & fields::HELP_KEYWORD != 0 {
            self.read_string(reader)?;
        }
        if flags & fields::SENDER_NAME != 0 {
            self.read_string(reader)?;
        }
        if flags & fields::TIMESTAMP != 0 {
            reader.read_i64()?;
            reader.read_7bit()?;
        }
        for field in fields::STRINGS {
            if flags & field != 0 {
                self.read_string(reader)?;
            }
        }
        for field in fields::POSITIONS {
            if flags & field != 0 {
                reader.read_7bit()?;
            }
        }
        if flags & fields::ARGUMENTS != 0 {
            for _ in 0..reader.read_7bit()? {
                self.read_string(reader)?;
            }
        }
        if importance && flags & fields::IMPORTANCE != 0 {
            reader.read_7bit()?;
        }
        Ok(())
    }

    fn read_target_started(&self, reader: &mut Reader<'_>) -> Result<Option<String>, ReportError> {
        self.skip_base_fields(reader, false)?;
        let target_name = self.read_string(reader)?;
        let _project_file = self.read_string(reader)?;
        let _target_file = self.read_string(reader)?;
        let _parent_target = self.read_string(reader)?;
        let _build_reason = reader.read_7bit()?;
        Ok(target_name.filter(|name| !name.is_empty()))
    }

    /// Global properties (when flagged present) followed by evaluated properties.
    fn read_evaluation_finished(
        &self,
        reader: &mut Reader<'_>,
    ) -> Result<Vec<(String, String)>, ReportError> {
        self.skip_base_fields(reader, true)?;
        let _project_file = self.read_string(reader)?;
        let global_properties = if reader.read_u8()? != 0 {
            self.list(reader.read_7bit()?)?
        } else {
            &[][..]
        };
        let properties = self.list(reader.read_7bit()?)?;
        Ok(global_properties.iter().chain(properties).cloned().collect())
    }
}

fn archive_source_files(payload: &[u8]) -> Result<Vec<PathBuf>, ReportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload))?;
    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        files.push(entry_to_path(entry.name()));
    }
    Ok(files)
}

/// Archive entries store `C:\src\a.cs` as `C/src/a.cs` and `/src/a.cs` as `src/a.cs`.
#[cfg(windows)]
fn entry_to_path(name: &str) -> PathBuf {
    let name = name.replace('/', "\\");
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some('\\')) if drive.is_ascii_alphabetic() => {
            PathBuf::from(format!("{drive}:{}", &name[1..]))
        }
        _ => PathBuf::from(name),
    }
}

#[cfg(not(windows))]
fn entry_to_path(name: &str) -> PathBuf {
    let name = name.replace('\\', "/");
    PathBuf::from(format!("/{}", name.trim_start_matches('/')))
}

#[cfg(windows)]
fn path_to_entry(path: &Path) -> String {
    path.to_string_lossy().replacen(':', "", 1).replace('\\', "/")
}

#[cfg(not(windows))]
fn path_to_entry(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').to_string()
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ReportError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                ReportError::InvalidEventLog(format!(
                    "unexpected end of data: need {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, ReportError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, ReportError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64, ReportError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn read_7bit(&mut self) -> Result<u32, ReportError> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ReportError::InvalidEventLog("7-bit integer too long".into()))
    }
}

fn write_7bit(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Writes event logs in the format [`BinlogDecoder`] reads.
///
/// Used to build fixtures without a real build engine:
///
/// ```
/// use buildcheck_core::report::binlog::{decode, LogWriter};
///
/// let mut writer = LogWriter::new();
/// writer.target_started("/src/App.csproj", "Build");
/// let log = decode(&writer.finish().unwrap()).unwrap();
/// assert!(log.is_target_executed("Build"));
/// ```
#[derive(Debug)]
pub struct LogWriter {
    body: Vec<u8>,
    strings: HashMap<String, u32>,
    list_count: u32,
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogWriter {
    pub fn new() -> Self {
        LogWriter {
            body: Vec::new(),
            strings: HashMap::new(),
            list_count: 0,
        }
    }

    fn record(&mut self, kind: u32, payload: &[u8]) {
        write_7bit(&mut self.body, kind);
        write_7bit(&mut self.body, payload.len() as u32);
        self.body.extend_from_slice(payload);
    }

    fn intern(&mut self, text: &str) -> u32 {
        if text.is_empty() {
            return 1;
        }
        if let Some(index) = self.strings.get(text) {
            return *index;
        }
        let index = FIRST_STRING_INDEX + self.strings.len() as u32;
        self.strings.insert(text.to_string(), index);
        let mut payload = Vec::with_capacity(text.len() + 5);
        write_7bit(&mut payload, text.len() as u32);
        payload.extend_from_slice(text.as_bytes());
        self.record(kind::STRING, &payload);
        index
    }

    fn name_value_list(&mut self, pairs: &[(&str, &str)]) -> u32 {
        if pairs.is_empty() {
            return 0;
        }
        let indices: Vec<(u32, u32)> = pairs
            .iter()
            .map(|(name, value)| (self.intern(name), self.intern(value)))
            .collect();
        let mut payload = Vec::new();
        write_7bit(&mut payload, indices.len() as u32);
        for (name, value) in indices {
            write_7bit(&mut payload, name);
            write_7bit(&mut payload, value);
        }
        self.record(kind::NAME_VALUE_LIST, &payload);
        self.list_count += 1;
        FIRST_LIST_INDEX + self.list_count - 1
    }

    /// Record that `target_name` started in `project_file`.
    pub fn target_started(&mut self, project_file: &str, target_name: &str) -> &mut Self {
        let project = self.intern(project_file);
        let target = self.intern(target_name);
        let message = self.intern(&format!("Target \"{target_name}\" started."));

        let mut payload = Vec::new();
        write_7bit(&mut payload, fields::MESSAGE | fields::THREAD_ID);
        write_7bit(&mut payload, message);
        write_7bit(&mut payload, 1);
        write_7bit(&mut payload, target);
        write_7bit(&mut payload, project);
        write_7bit(&mut payload, project);
        write_7bit(&mut payload, 0);
        write_7bit(&mut payload, 0);
        self.record(kind::TARGET_STARTED, &payload);
        self
    }

    /// Record the evaluated properties of `project_file`.
    pub fn evaluation_finished(
        &mut self,
        project_file: &str,
        properties: &[(&str, &str)],
    ) -> &mut Self {
        let project = self.intern(project_file);
        let list = self.name_value_list(properties);

        let mut payload = Vec::new();
        write_7bit(&mut payload, 0);
        write_7bit(&mut payload, project);
        payload.push(0);
        write_7bit(&mut payload, list);
        self.record(kind::PROJECT_EVALUATION_FINISHED, &payload);
        self
    }

    /// Embed source files, keyed by their full path.
    pub fn import_archive<P: AsRef<Path>>(
        &mut self,
        files: &[(P, &str)],
    ) -> Result<&mut Self, ReportError> {
        let mut archive = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (path, content) in files {
            archive.start_file(path_to_entry(path.as_ref()), options)?;
            archive.write_all(content.as_bytes())?;
        }
        let payload = archive.finish()?.into_inner();
        self.record(kind::PROJECT_IMPORT_ARCHIVE, &payload);
        Ok(self)
    }

    /// Append an opaque record of another kind.
    pub fn raw_record(&mut self, kind: u32, payload: &[u8]) -> &mut Self {
        self.record(kind, payload);
        self
    }

    /// Produce the compressed log.
    pub fn finish(&self) -> Result<Vec<u8>, ReportError> {
        let mut raw = Vec::with_capacity(self.body.len() + 9);
        raw.extend_from_slice(&WRITER_FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&MIN_FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&self.body);
        write_7bit(&mut raw, kind::END_OF_FILE);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(path: &str) -> PathBuf {
        if cfg!(windows) {
            PathBuf::from(format!("C:{}", path.replace('/', "\\")))
        } else {
            PathBuf::from(path)
        }
    }

    #[test]
    fn test_empty_log_has_no_views() {
        let bytes = LogWriter::new().finish().unwrap();
        let log = decode(&bytes).unwrap();
        assert!(log.source_files.is_empty());
        assert!(log.targets.is_empty());
        assert!(log.properties.is_empty());
        assert_eq!(log.format_version, WRITER_FORMAT_VERSION);
    }

    #[test]
    fn test_source_files_are_a_set() {
        let program = abs("/work/app/Program.cs");
        let project = abs("/work/app/App.csproj");
        let mut writer = LogWriter::new();
        writer
            .import_archive(&[(&program, "class P {}"), (&project, "<Project />")])
            .unwrap()
            .import_archive(&[(&program, "class P {}")])
            .unwrap();

        let log = decode(&writer.finish().unwrap()).unwrap();
        assert_eq!(log.source_files.len(), 2);
        assert!(log.contains_source_file(&program));
        assert!(log.contains_source_file(&project));
    }

    #[test]
    fn test_targets_and_properties() {
        let mut writer = LogWriter::new();
        writer
            .target_started("/work/App.csproj", "Build")
            .target_started("/work/App.csproj", "_MTPBuild")
            .evaluation_finished("/work/App.csproj", &[("LangVersion", "latest"), ("Nullable", "enable")])
            .evaluation_finished("/work/App.csproj", &[("LangVersion", "preview")]);

        let log = decode(&writer.finish().unwrap()).unwrap();
        assert!(log.is_target_executed("_MTPBuild"));
        assert!(!log.is_target_executed("Pack"));
        assert_eq!(log.property("LangVersion"), Some("preview"));
        assert_eq!(log.property("Nullable"), Some("enable"));
        assert_eq!(log.property("Missing"), None);
    }

    #[test]
    fn test_unknown_records_are_skipped() {
        let mut writer = LogWriter::new();
        writer
            .raw_record(42, &[1, 2, 3, 4, 5])
            .target_started("/work/App.csproj", "Build");
        let log = decode(&writer.finish().unwrap()).unwrap();
        assert!(log.is_target_executed("Build"));
    }

    #[test]
    fn test_unsupported_fields_skip_the_record() {
        let mut extended = Vec::new();
        write_7bit(&mut extended, 1 << 16);
        let mut writer = LogWriter::new();
        writer.raw_record(kind::TARGET_STARTED, &extended);
        let log = decode(&writer.finish().unwrap()).unwrap();
        assert!(log.targets.is_empty());
    }

    fn gzip_log(records: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&WRITER_FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&MIN_FORMAT_VERSION.to_le_bytes());
        for (kind, payload) in records {
            write_7bit(&mut raw, *kind);
            write_7bit(&mut raw, payload.len() as u32);
            raw.extend_from_slice(payload);
        }
        write_7bit(&mut raw, kind::END_OF_FILE);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap()
    }

    fn string_record(text: &str) -> (u32, Vec<u8>) {
        let mut payload = Vec::new();
        write_7bit(&mut payload, text.len() as u32);
        payload.extend_from_slice(text.as_bytes());
        (kind::STRING, payload)
    }

    #[test]
    fn test_string_records_carry_their_own_length() {
        let long_message = "m".repeat(200);
        // Strings 10..: message, target, project.
        let mut target = Vec::new();
        for value in [fields::MESSAGE, 10, 11, 12, 12, 0, 0] {
            write_7bit(&mut target, value);
        }
        let bytes = gzip_log(&[
            string_record(&long_message),
            string_record("Build"),
            string_record("/work/App.csproj"),
            (kind::TARGET_STARTED, target),
        ]);

        let log = decode(&bytes).unwrap();
        assert_eq!(log.targets, BTreeSet::from(["Build".to_string()]));
    }

    #[test]
    fn test_evaluation_with_global_properties() {
        // Strings 10..: project, Configuration, Release, LangVersion, latest.
        let mut globals = Vec::new();
        for value in [1, 11, 12] {
            write_7bit(&mut globals, value);
        }
        let mut evaluated = Vec::new();
        for value in [1, 13, 14] {
            write_7bit(&mut evaluated, value);
        }
        let mut finished = Vec::new();
        for value in [fields::IMPORTANCE, 2, 10] {
            write_7bit(&mut finished, value);
        }
        finished.push(1);
        for value in [10, 11] {
            write_7bit(&mut finished, value);
        }

        let bytes = gzip_log(&[
            string_record("/work/App.csproj"),
            string_record("Configuration"),
            string_record("Release"),
            string_record("LangVersion"),
            string_record("latest"),
            (kind::NAME_VALUE_LIST, globals),
            (kind::NAME_VALUE_LIST, evaluated),
            (kind::PROJECT_EVALUATION_FINISHED, finished),
        ]);

        let log = decode(&bytes).unwrap();
        assert_eq!(log.property("Configuration"), Some("Release"));
        assert_eq!(log.property("LangVersion"), Some("latest"));
    }

    #[test]
    fn test_writer_strings_use_record_framing() {
        let long_target = "T".repeat(300);
        let mut writer = LogWriter::new();
        writer.target_started("/work/App.csproj", &long_target);
        let log = decode(&writer.finish().unwrap()).unwrap();
        assert!(log.is_target_executed(&long_target));
    }

    #[test]
    fn test_not_gzip_is_invalid() {
        let err = decode(b"definitely not a log").unwrap_err();
        assert!(matches!(err, ReportError::InvalidEventLog(_)));
    }

    #[test]
    fn test_old_format_is_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&8i32.to_le_bytes());
        raw.extend_from_slice(&8i32.to_le_bytes());
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();

        let err = decode(&encoder.finish().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ReportError::UnsupportedEventLogVersion { version: 8, .. }
        ));
    }

    #[test]
    fn test_truncated_record_is_invalid() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&WRITER_FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&MIN_FORMAT_VERSION.to_le_bytes());
        raw.extend_from_slice(&[kind::STRING as u8, 10, b'a']);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();

        assert!(decode(&encoder.finish().unwrap()).is_err());
    }

    #[test]
    fn test_seven_bit_encoding_boundaries() {
        for value in [0u32, 1, 127, 128, 300, 16_384, u32::MAX] {
            let mut buf = Vec::new();
            write_7bit(&mut buf, value);
            assert_eq!(Reader::new(&buf).read_7bit().unwrap(), value);
        }
    }
}
