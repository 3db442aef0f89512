use std::collections::{BTreeMap, HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::warn;

use problems_protocol::{ElementPayload, EntryInfo, ObjectPath, ReportInfo, flags};

use crate::element::{
    self, ElementClass, ElementKind, ElementValue, GATING_ELEMENTS, check_privileged_value,
    validate_element_name,
};
use crate::error::{ProblemsError, Result};
use crate::limits::Limits;
use crate::store::{ProblemId, ProblemStore};

/// Lifecycle of a problem entry.
///
/// `New` entries belong to an unfinished ingestion task; `Deleted` records
/// linger only so stale handles resolve to a gone-error instead of a
/// not-found one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    New,
    Complete,
    Deleted,
}

pub struct EntryRecord {
    pub problem: ProblemId,
    pub owner_uid: u32,
    pub state: EntryState,
}

/// Derive the externally visible entry handle from the problem id.
pub fn entry_path(problem: &str) -> ObjectPath {
    let digest = Sha256::digest(problem.as_bytes());
    format!("/problems/entry/{}", hex::encode(&digest[..8]))
}

pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// All known entries, keyed by handle.
pub struct EntryRegistry {
    entries: HashMap<ObjectPath, EntryRecord>,
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert_new(&mut self, problem: ProblemId, owner_uid: u32) -> ObjectPath {
        let path = entry_path(&problem);
        self.entries.insert(
            path.clone(),
            EntryRecord {
                problem,
                owner_uid,
                state: EntryState::New,
            },
        );
        path
    }

    /// Address resolution: unknown handles are bad addresses, deleted ones
    /// are gone. Checked before any access decision.
    pub fn lookup(&self, path: &str) -> Result<&EntryRecord> {
        let record = self.entries.get(path).ok_or(ProblemsError::BadAddress)?;
        if record.state == EntryState::Deleted {
            return Err(ProblemsError::ObjectGone);
        }
        Ok(record)
    }

    pub fn mark_complete(&mut self, path: &str) {
        if let Some(record) = self.entries.get_mut(path) {
            record.state = EntryState::Complete;
        }
    }

    pub fn mark_deleted(&mut self, path: &str) {
        if let Some(record) = self.entries.get_mut(path) {
            record.state = EntryState::Deleted;
        }
    }

    /// Drop the record entirely (temporary entries discarded by their task).
    pub fn remove(&mut self, path: &str) -> Option<EntryRecord> {
        self.entries.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectPath, &EntryRecord)> {
        self.entries.iter()
    }

    /// Complete problems owned by `uid`, for the per-user ceiling.
    pub fn owned_complete_count(&self, uid: u32) -> usize {
        self.entries
            .values()
            .filter(|r| r.state == EntryState::Complete && r.owner_uid == uid)
            .count()
    }

    /// Find a complete entry of the same owner with the given duphash.
    pub fn find_duplicate(
        &self,
        store: &dyn ProblemStore,
        duphash: &str,
        owner_uid: u32,
    ) -> Result<Option<ObjectPath>> {
        for (path, record) in &self.entries {
            if record.state != EntryState::Complete || record.owner_uid != owner_uid {
                continue;
            }
            if let Some(existing) = store.read_element(&record.problem, "duphash")? {
                if existing == duphash.as_bytes() {
                    return Ok(Some(path.clone()));
                }
            }
        }
        Ok(None)
    }
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read access: owner, root, or an authorized session (effective uid 0).
pub fn check_read(record: &EntryRecord, effective_uid: u32) -> Result<()> {
    if effective_uid == 0 || record.owner_uid == effective_uid {
        Ok(())
    } else {
        Err(ProblemsError::AccessDeniedRead)
    }
}

pub fn check_delete(record: &EntryRecord, effective_uid: u32) -> Result<()> {
    if effective_uid == 0 || record.owner_uid == effective_uid {
        Ok(())
    } else {
        Err(ProblemsError::AccessDeniedDelete)
    }
}

pub fn check_write(record: &EntryRecord, effective_uid: u32) -> Result<()> {
    if effective_uid == 0 || record.owner_uid == effective_uid {
        Ok(())
    } else {
        Err(ProblemsError::AccessDeniedWrite)
    }
}

/// Read selected elements, filtered by the restriction bits. Elements that
/// do not match the restriction are omitted, never reported as errors.
pub fn read_elements(
    store: &dyn ProblemStore,
    record: &EntryRecord,
    names: &[String],
    bits: u32,
) -> Result<BTreeMap<String, ElementPayload>> {
    if bits & flags::READ_ALL_FD != 0 && bits & flags::READ_ALL_NO_FD != 0 {
        return Err(ProblemsError::InvalidRequest(
            "Only one of data or descriptor transfer can be requested".to_string(),
        ));
    }

    let only_bits = bits & (flags::READ_ONLY_TEXT | flags::READ_ONLY_BIG_TEXT | flags::READ_ONLY_BINARY);
    let class_allowed = |class: ElementClass| {
        if only_bits == 0 {
            return true;
        }
        match class {
            ElementClass::Text => only_bits & flags::READ_ONLY_TEXT != 0,
            ElementClass::BigText => only_bits & flags::READ_ONLY_BIG_TEXT != 0,
            ElementClass::Binary => only_bits & flags::READ_ONLY_BINARY != 0,
        }
    };

    let mut result = BTreeMap::new();
    for name in names {
        if validate_element_name(name).is_err() {
            continue;
        }
        let Some(data) = store.read_element(&record.problem, name)? else {
            continue;
        };
        let kind = store
            .element_kind(&record.problem, name)?
            .unwrap_or(ElementKind::Text);
        if !class_allowed(element::classify(kind, &data)) {
            continue;
        }
        let payload = match kind {
            ElementKind::Binary => ElementPayload::Binary { data },
            ElementKind::Text => match String::from_utf8(data) {
                Ok(value) => ElementPayload::Text { value },
                Err(e) => ElementPayload::Binary {
                    data: e.into_bytes(),
                },
            },
        };
        result.insert(name.clone(), payload);
    }
    Ok(result)
}

/// Write elements subject to validation and the configured ceilings.
///
/// At the element-count ceiling, new names are skipped silently while an
/// overwrite of an existing name errors; the count-fatal bit upgrades the
/// skip to an error as well. The ingestion pipeline passes the size- and
/// io-fatal bits so an oversized problem is rejected whole.
pub fn save_elements(
    store: &dyn ProblemStore,
    record: &EntryRecord,
    elements: impl IntoIterator<Item = (String, ElementValue)>,
    bits: u32,
    caller_uid: u32,
    limits: &Limits,
) -> Result<()> {
    let mut existing: HashSet<String> = store.list_elements(&record.problem)?.into_iter().collect();
    let mut used = store.total_size(&record.problem)?;

    for (name, value) in elements {
        validate_element_name(&name)?;
        if GATING_ELEMENTS.contains(&name.as_str()) {
            let Some(text) = value.as_text() else {
                return Err(ProblemsError::InvalidElement(format!(
                    "Element '{name}' must be a text value"
                )));
            };
            check_privileged_value(&name, text, caller_uid)?;
        }

        let is_new = !existing.contains(&name);
        if limits.elements_exceeded(existing.len() + 1) {
            if !is_new || bits & flags::SAVE_ELEMENTS_COUNT_LIMIT_FATAL != 0 {
                return Err(ProblemsError::LimitsExceeded("Too many elements".to_string()));
            }
            warn!(problem = %record.problem, element = %name, "element skipped: too many elements");
            continue;
        }

        let old_size = if is_new {
            0
        } else {
            store.element_size(&record.problem, &name)?.unwrap_or(0)
        };
        let budget = if limits.max_data_size == 0 {
            u64::MAX
        } else {
            limits.max_data_size.saturating_sub(used - old_size)
        };

        let (data, kind) = match value {
            ElementValue::Text(s) => (s.into_bytes(), ElementKind::Text),
            ElementValue::Binary(b) => (b, ElementKind::Binary),
            ElementValue::Stream(mut stream) => match stream.read_limited(budget) {
                // a descriptor declares no kind; sniff the drained bytes
                Ok(data) => {
                    let kind = if std::str::from_utf8(&data).is_ok() {
                        ElementKind::Text
                    } else {
                        ElementKind::Binary
                    };
                    (data, kind)
                }
                Err(e @ ProblemsError::LimitsExceeded(_)) => {
                    if bits & flags::SAVE_DATA_SIZE_LIMIT_FATAL != 0 {
                        return Err(e);
                    }
                    warn!(problem = %record.problem, element = %name, "element skipped: data too big");
                    continue;
                }
                Err(e) => {
                    if bits & flags::SAVE_IO_ERROR_FATAL != 0 {
                        return Err(e);
                    }
                    warn!(problem = %record.problem, element = %name, "element skipped: descriptor read failed");
                    continue;
                }
            },
        };

        if limits.data_size_exceeded(used - old_size + data.len() as u64) {
            if bits & flags::SAVE_DATA_SIZE_LIMIT_FATAL != 0 {
                return Err(ProblemsError::LimitsExceeded(
                    "Problem data is too big".to_string(),
                ));
            }
            warn!(problem = %record.problem, element = %name, "element skipped: data too big");
            continue;
        }

        store.save_element(&record.problem, &name, &data, kind)?;
        used = used - old_size + data.len() as u64;
        existing.insert(name);
    }
    Ok(())
}

/// Remove elements by name. Missing names are skipped silently.
pub fn delete_elements(
    store: &dyn ProblemStore,
    record: &EntryRecord,
    names: &[String],
) -> Result<()> {
    for name in names {
        validate_element_name(name)?;
        store.delete_element(&record.problem, name)?;
    }
    Ok(())
}

/// All elements of a problem, as payloads.
pub fn problem_data(
    store: &dyn ProblemStore,
    record: &EntryRecord,
) -> Result<BTreeMap<String, ElementPayload>> {
    let names = store.list_elements(&record.problem)?;
    read_elements(store, record, &names, 0)
}

/// Bump the occurrence bookkeeping of an existing problem.
pub fn register_occurrence(store: &dyn ProblemStore, record: &EntryRecord) -> Result<()> {
    let count = store
        .read_element(&record.problem, "count")?
        .and_then(|d| String::from_utf8(d).ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(1);
    store.save_element(
        &record.problem,
        "count",
        (count + 1).to_string().as_bytes(),
        ElementKind::Text,
    )?;
    store.save_element(
        &record.problem,
        "last_occurrence",
        now_epoch().to_string().as_bytes(),
        ElementKind::Text,
    )?;
    Ok(())
}

/// Assemble the property view of an entry.
pub fn entry_info(store: &dyn ProblemStore, record: &EntryRecord) -> Result<EntryInfo> {
    let text = |name: &str| -> Result<Option<String>> {
        Ok(store
            .read_element(&record.problem, name)?
            .and_then(|d| String::from_utf8(d).ok()))
    };
    let number = |name: &str| -> Result<Option<u64>> {
        Ok(text(name)?.and_then(|s| s.trim().parse::<u64>().ok()))
    };

    let uid = number("uid")?.map(|v| v as u32).unwrap_or(record.owner_uid);
    let first = number("time")?.unwrap_or(0);
    let last = number("last_occurrence")?.unwrap_or(first);
    let is_remote = text("remote")?.as_deref() == Some("1");
    let reports = text("reported_to")?
        .map(|t| parse_reported_to(&t))
        .unwrap_or_default();

    let mut elements = store.list_elements(&record.problem)?;
    elements.sort();

    Ok(EntryInfo {
        id: record.problem.clone(),
        uuid: text("uuid")?.unwrap_or_default(),
        duphash: text("duphash")?,
        problem_type: text("type")?.unwrap_or_default(),
        reason: text("reason")?,
        executable: text("executable")?,
        component: text("component")?,
        command_line_arguments: text("cmdline")?,
        package: text("package")?,
        user: text("username")?,
        hostname: text("hostname")?,
        uid,
        count: number("count")?.unwrap_or(1),
        first_occurrence_epoch_secs: first,
        last_occurrence_epoch_secs: last,
        is_reported: !reports.is_empty(),
        can_be_reported: !is_remote,
        is_remote,
        elements,
        reports,
    })
}

/// Parse the `reported_to` element: one destination per line, in the form
/// `LABEL: KEY=value KEY=value`. `MSG=` swallows the rest of the line.
pub fn parse_reported_to(text: &str) -> Vec<ReportInfo> {
    let mut reports = Vec::new();
    for line in text.lines() {
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        let mut data = BTreeMap::new();
        let mut rest = rest.trim_start();
        while !rest.is_empty() {
            if let Some(msg) = rest.strip_prefix("MSG=") {
                data.insert("MSG".to_string(), msg.to_string());
                break;
            }
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            if let Some((key, value)) = rest[..end].split_once('=') {
                data.insert(key.to_string(), value.to_string());
            }
            rest = rest[end..].trim_start();
        }
        reports.push(ReportInfo {
            label: label.to_string(),
            data,
        });
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn complete_entry(store: &MemoryStore, uid: u32) -> (EntryRegistry, ObjectPath) {
        let mut registry = EntryRegistry::new();
        let problem = store.create("CCpp", uid).unwrap();
        let path = registry.insert_new(problem, uid);
        registry.mark_complete(&path);
        (registry, path)
    }

    #[test]
    fn lookup_distinguishes_missing_from_deleted() {
        let store = MemoryStore::new();
        let (mut registry, path) = complete_entry(&store, 1000);

        assert!(registry.lookup(&path).is_ok());
        assert!(matches!(
            registry.lookup("/problems/entry/ffffffffffffffff"),
            Err(ProblemsError::BadAddress)
        ));

        registry.mark_deleted(&path);
        assert!(matches!(registry.lookup(&path), Err(ProblemsError::ObjectGone)));
    }

    #[test]
    fn access_checks_have_distinct_errors() {
        let record = EntryRecord {
            problem: "p".to_string(),
            owner_uid: 1000,
            state: EntryState::Complete,
        };
        assert!(check_read(&record, 1000).is_ok());
        assert!(check_read(&record, 0).is_ok());
        assert!(matches!(
            check_read(&record, 1001),
            Err(ProblemsError::AccessDeniedRead)
        ));
        assert!(matches!(
            check_delete(&record, 1001),
            Err(ProblemsError::AccessDeniedDelete)
        ));
        assert!(matches!(
            check_write(&record, 1001),
            Err(ProblemsError::AccessDeniedWrite)
        ));
    }

    #[test]
    fn save_then_read_roundtrip() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let limits = Limits::default();

        save_elements(
            &store,
            record,
            vec![
                ("reason".to_string(), ElementValue::Text("boom".to_string())),
                (
                    "coredump".to_string(),
                    ElementValue::Binary(vec![0xde, 0xad]),
                ),
            ],
            flags::SAVE_ALL_FATAL,
            1000,
            &limits,
        )
        .unwrap();

        let all = read_elements(
            &store,
            record,
            &["reason".to_string(), "coredump".to_string()],
            0,
        )
        .unwrap();
        assert_eq!(
            all.get("reason"),
            Some(&ElementPayload::Text {
                value: "boom".to_string()
            })
        );
        assert_eq!(
            all.get("coredump"),
            Some(&ElementPayload::Binary {
                data: vec![0xde, 0xad]
            })
        );
    }

    #[test]
    fn read_restriction_omits_mismatches() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let limits = Limits::default();

        save_elements(
            &store,
            record,
            vec![
                ("reason".to_string(), ElementValue::Text("text".to_string())),
                ("blob".to_string(), ElementValue::Binary(vec![0xff, 0x00])),
            ],
            flags::SAVE_ALL_FATAL,
            1000,
            &limits,
        )
        .unwrap();

        let names = vec!["reason".to_string(), "blob".to_string(), "nope".to_string()];
        let only_text =
            read_elements(&store, record, &names, flags::READ_ONLY_TEXT).unwrap();
        assert_eq!(only_text.len(), 1);
        assert!(only_text.contains_key("reason"));

        let only_binary =
            read_elements(&store, record, &names, flags::READ_ONLY_BINARY).unwrap();
        assert_eq!(only_binary.len(), 1);
        assert!(only_binary.contains_key("blob"));
    }

    #[test]
    fn conflicting_fd_bits_are_invalid() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let err = read_elements(
            &store,
            record,
            &[],
            flags::READ_ALL_FD | flags::READ_ALL_NO_FD,
        )
        .unwrap_err();
        assert!(matches!(err, ProblemsError::InvalidRequest(_)));
    }

    #[test]
    fn count_ceiling_skips_new_names_but_rejects_overwrites() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let limits = Limits {
            max_elements: 2,
            ..Limits::default()
        };

        save_elements(
            &store,
            record,
            vec![
                ("one".to_string(), ElementValue::Text("1".to_string())),
                ("two".to_string(), ElementValue::Text("2".to_string())),
            ],
            0,
            1000,
            &limits,
        )
        .unwrap();

        // A new name at the ceiling is silently ignored
        save_elements(
            &store,
            record,
            vec![("three".to_string(), ElementValue::Text("3".to_string()))],
            0,
            1000,
            &limits,
        )
        .unwrap();
        assert_eq!(store.read_element(&record.problem, "three").unwrap(), None);

        // Touching an existing name while at the ceiling errors
        let err = save_elements(
            &store,
            record,
            vec![("one".to_string(), ElementValue::Text("updated".to_string()))],
            0,
            1000,
            &limits,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Too many elements"));
        assert_eq!(
            store.read_element(&record.problem, "one").unwrap(),
            Some(b"1".to_vec())
        );

        // The count-fatal bit makes the silent skip an error too
        let err = save_elements(
            &store,
            record,
            vec![("three".to_string(), ElementValue::Text("3".to_string()))],
            flags::SAVE_ELEMENTS_COUNT_LIMIT_FATAL,
            1000,
            &limits,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Too many elements"));
    }

    #[test]
    fn data_size_ceiling_is_enforced() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let limits = Limits {
            max_data_size: 8,
            ..Limits::default()
        };

        let err = save_elements(
            &store,
            record,
            vec![(
                "big".to_string(),
                ElementValue::Text("123456789".to_string()),
            )],
            flags::SAVE_ALL_FATAL,
            1000,
            &limits,
        )
        .unwrap_err();
        assert!(err.to_string().contains("too big"));

        // Replacing an element reclaims its old budget
        save_elements(
            &store,
            record,
            vec![("a".to_string(), ElementValue::Text("12345678".to_string()))],
            flags::SAVE_ALL_FATAL,
            1000,
            &limits,
        )
        .unwrap();
        save_elements(
            &store,
            record,
            vec![("a".to_string(), ElementValue::Text("abcdefgh".to_string()))],
            flags::SAVE_ALL_FATAL,
            1000,
            &limits,
        )
        .unwrap();
    }

    #[test]
    fn gating_elements_must_be_text() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let limits = Limits::default();

        let err = save_elements(
            &store,
            record,
            vec![("type".to_string(), ElementValue::Binary(vec![1, 2, 3]))],
            0,
            1000,
            &limits,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be a text value"));
    }

    #[test]
    fn privileged_type_rejected_on_save() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        let limits = Limits::default();

        let err = save_elements(
            &store,
            record,
            vec![(
                "type".to_string(),
                ElementValue::Text("Kerneloops".to_string()),
            )],
            0,
            1000,
            &limits,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn duplicate_scan_matches_owner_and_duphash() {
        let store = MemoryStore::new();
        let mut registry = EntryRegistry::new();

        let p1 = store.create("CCpp", 1000).unwrap();
        store
            .save_element(&p1, "duphash", b"abc", ElementKind::Text)
            .unwrap();
        let path1 = registry.insert_new(p1, 1000);
        registry.mark_complete(&path1);

        assert_eq!(
            registry.find_duplicate(&store, "abc", 1000).unwrap(),
            Some(path1.clone())
        );
        // different owner, no match
        assert_eq!(registry.find_duplicate(&store, "abc", 1001).unwrap(), None);
        // different hash, no match
        assert_eq!(registry.find_duplicate(&store, "xyz", 1000).unwrap(), None);
    }

    #[test]
    fn occurrence_bump_updates_count_and_timestamp() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        store
            .save_element(&record.problem, "count", b"3", ElementKind::Text)
            .unwrap();

        register_occurrence(&store, record).unwrap();
        assert_eq!(
            store.read_element(&record.problem, "count").unwrap(),
            Some(b"4".to_vec())
        );
        assert!(
            store
                .read_element(&record.problem, "last_occurrence")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn entry_info_assembles_properties() {
        let store = MemoryStore::new();
        let (registry, path) = complete_entry(&store, 1000);
        let record = registry.lookup(&path).unwrap();
        for (name, value) in [
            ("type", "CCpp"),
            ("uuid", "u-1"),
            ("duphash", "d-1"),
            ("reason", "segfault"),
            ("executable", "/usr/bin/foo"),
            ("cmdline", "foo --bar"),
            ("uid", "1000"),
            ("count", "2"),
            ("time", "1700000000"),
            ("reported_to", "Bugzilla: URL=https://bz.example.com/1"),
        ] {
            store
                .save_element(&record.problem, name, value.as_bytes(), ElementKind::Text)
                .unwrap();
        }

        let info = entry_info(&store, record).unwrap();
        assert_eq!(info.problem_type, "CCpp");
        assert_eq!(info.uuid, "u-1");
        assert_eq!(info.duphash.as_deref(), Some("d-1"));
        assert_eq!(info.uid, 1000);
        assert_eq!(info.count, 2);
        assert_eq!(info.first_occurrence_epoch_secs, 1700000000);
        // last_occurrence falls back to the first occurrence
        assert_eq!(info.last_occurrence_epoch_secs, 1700000000);
        assert!(info.is_reported);
        assert!(info.can_be_reported);
        assert!(!info.is_remote);
        assert_eq!(info.reports.len(), 1);
        assert!(info.elements.contains(&"reason".to_string()));
    }

    #[test]
    fn reported_to_parsing() {
        let text = "ABRT Server: URL=https://retrace.example.com/123 BTHASH=deadbeef\n\
                    Bugzilla: URL=https://bz.example.com/42\n\
                    Logger: MSG=stored in /var/log/abrt.log trailing words\n\
                    garbage line without a colon\n";
        let reports = parse_reported_to(text);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].label, "ABRT Server");
        assert_eq!(
            reports[0].data.get("BTHASH").map(String::as_str),
            Some("deadbeef")
        );
        assert_eq!(reports[1].label, "Bugzilla");
        assert_eq!(
            reports[2].data.get("MSG").map(String::as_str),
            Some("stored in /var/log/abrt.log trailing words")
        );
    }
}
