use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::Registration, export::FlatRecord, id::new_ulid_string};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    Duplicate { fields: Vec<&'static str> },
    SchemaVersionMismatch { expected: u32, got: u32 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
            Self::Duplicate { fields } => {
                write!(f, "duplicate entries found for: {}", fields.join(", "))
            }
            Self::SchemaVersionMismatch { expected, got } => {
                write!(f, "schema_version mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
            Self::Duplicate { .. } | Self::SchemaVersionMismatch { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

/// One durable verified registration. Only verified records ever reach this
/// store; the unverified form data lives in the staging layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub full_name: String,
    pub student_email: String,
    pub student_number: String,
    pub roll_number: String,
    pub branch: String,
    pub gender: String,
    pub scholar: String,
    pub mobile_number: String,
    pub domain: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: DateTime<Utc>,
}

impl StudentRecord {
    /// Flat field map in the export wire shape. Timestamps stay RFC 3339
    /// here; the export writer owns the tabular timestamp format.
    pub fn to_flat_map(&self) -> FlatRecord {
        let ts = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
        BTreeMap::from([
            ("id".to_string(), self.id.clone()),
            ("fullName".to_string(), self.full_name.clone()),
            ("studentEmail".to_string(), self.student_email.clone()),
            ("studentNumber".to_string(), self.student_number.clone()),
            ("rollNumber".to_string(), self.roll_number.clone()),
            ("branch".to_string(), self.branch.clone()),
            ("gender".to_string(), self.gender.clone()),
            ("scholar".to_string(), self.scholar.clone()),
            ("mobileNumber".to_string(), self.mobile_number.clone()),
            ("domain".to_string(), self.domain.clone()),
            ("isVerified".to_string(), self.is_verified.to_string()),
            ("createdAt".to_string(), ts(&self.created_at)),
            ("updatedAt".to_string(), ts(&self.updated_at)),
            ("verifiedAt".to_string(), ts(&self.verified_at)),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub student_number: bool,
    pub roll_number: bool,
    pub student_email: bool,
}

impl DuplicateCheck {
    pub fn any(&self) -> bool {
        self.student_number || self.roll_number || self.student_email
    }

    fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.student_number {
            fields.push("studentNumber");
        }
        if self.roll_number {
            fields.push("rollNumber");
        }
        if self.student_email {
            fields.push("studentEmail");
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct PersistedStudents {
    schema_version: u32,
    #[serde(default)]
    students: BTreeMap<String, StudentRecord>,
}

impl PersistedStudents {
    fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            students: BTreeMap::new(),
        }
    }
}

/// Durable record store backed by a pretty-printed JSON snapshot, keyed by
/// normalized email. Every mutation rewrites the snapshot atomically.
#[derive(Debug)]
pub struct StudentStore {
    path: PathBuf,
    data: PersistedStudents,
}

impl StudentStore {
    pub fn load_or_init(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("students.json");
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            let data: PersistedStudents = serde_json::from_slice(&bytes)?;
            if data.schema_version != SCHEMA_VERSION {
                return Err(StoreError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    got: data.schema_version,
                });
            }
            data
        } else {
            let data = PersistedStudents::empty();
            write_atomic(&path, &serde_json::to_vec_pretty(&data)?)?;
            data
        };
        Ok(Self { path, data })
    }

    pub fn check_duplicates(&self, registration: &Registration) -> DuplicateCheck {
        let email = registration.normalized_email();
        let mut check = DuplicateCheck {
            student_number: false,
            roll_number: false,
            student_email: self.data.students.contains_key(&email),
        };
        for record in self.data.students.values() {
            if record.student_number == registration.student_number {
                check.student_number = true;
            }
            if record.roll_number == registration.roll_number {
                check.roll_number = true;
            }
        }
        check
    }

    /// Persists a verified registration. The caller has already confirmed
    /// the email; the record is born verified with all three timestamps set.
    pub fn create(&mut self, registration: &Registration) -> Result<StudentRecord, StoreError> {
        self.create_at(registration, Utc::now())
    }

    pub fn create_at(
        &mut self,
        registration: &Registration,
        now: DateTime<Utc>,
    ) -> Result<StudentRecord, StoreError> {
        let check = self.check_duplicates(registration);
        if check.any() {
            return Err(StoreError::Duplicate {
                fields: check.fields(),
            });
        }
        let record = StudentRecord {
            id: new_ulid_string(),
            full_name: registration.full_name.clone(),
            student_email: registration.normalized_email(),
            student_number: registration.student_number.clone(),
            roll_number: registration.roll_number.clone(),
            branch: registration.branch.clone(),
            gender: registration.gender.clone(),
            scholar: registration.scholar.clone(),
            mobile_number: registration.mobile_number.clone(),
            domain: registration.domain.clone(),
            is_verified: true,
            created_at: now,
            updated_at: now,
            verified_at: now,
        };
        self.data
            .students
            .insert(record.student_email.clone(), record.clone());
        self.save()?;
        Ok(record)
    }

    pub fn find_by_email(&self, email: &str) -> Option<&StudentRecord> {
        self.data
            .students
            .get(&crate::domain::normalize_email(email))
    }

    pub fn delete_by_email(&mut self, email: &str) -> Result<bool, StoreError> {
        let removed = self
            .data
            .students
            .remove(&crate::domain::normalize_email(email))
            .is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn list_verified(&self) -> Vec<StudentRecord> {
        self.data
            .students
            .values()
            .filter(|record| record.is_verified)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.data.students.len()
    }

    fn save(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.data)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_path = dir.join(format!("{}.tmp", file_name.to_string_lossy()));
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        let _ = file.sync_all();
    }

    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}
