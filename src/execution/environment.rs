//! Environment and working-directory setup for the child

use std::ffi::{CString, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::errors::{Result, SpawnError};
use crate::execution::channel::{ChildError, ChildErrorKind};
use crate::request::SpawnRequest;

/// Environment table installed at exec, plus the working directory to enter first
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPlan {
    entries: Vec<CString>,
    cwd: Option<CString>,
}

impl EnvironmentPlan {
    /// Apply the request's pairs over the current process environment
    pub fn prepare(request: &SpawnRequest) -> Result<Self> {
        Self::prepare_with(std::env::vars_os(), request)
    }

    /// Apply the request's pairs over an explicit base environment
    pub fn prepare_with<I>(base: I, request: &SpawnRequest) -> Result<Self>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let merged = compose(base, &request.environment_pairs);
        let entries = merged
            .into_iter()
            .map(|entry| {
                CString::new(entry).map_err(|e| {
                    SpawnError::InvalidRequest(format!(
                        "environment entry contains nul byte: {}",
                        String::from_utf8_lossy(&e.into_vec())
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let cwd = request
            .effective_cwd()
            .map(|dir| {
                CString::new(dir.as_os_str().as_bytes()).map_err(|_| {
                    SpawnError::InvalidRequest(format!(
                        "working directory contains nul byte: {}",
                        dir.display()
                    ))
                })
            })
            .transpose()?;

        Ok(Self { entries, cwd })
    }

    /// `KEY=VALUE` entries in install order
    pub fn entries(&self) -> &[CString] {
        &self.entries
    }

    /// Value of `KEY` in the composed environment
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.iter().find_map(|entry| {
            let bytes = entry.as_bytes();
            match split_key(bytes) {
                (k, Some(value)) if k == key => Some(value),
                _ => None,
            }
        })
    }

    /// Child branch: enter the working directory, if any
    pub fn enter_workspace(&self) -> std::result::Result<(), ChildError<'_>> {
        if let Some(cwd) = &self.cwd {
            if unsafe { libc::chdir(cwd.as_ptr()) } != 0 {
                return Err(ChildError::last(ChildErrorKind::Chdir, cwd.as_bytes()));
            }
        }
        Ok(())
    }
}

/// Later pairs replace earlier entries with the same key in place; new keys
/// are appended. A pair without `=` removes the key.
fn compose<I>(base: I, pairs: &[String]) -> Vec<Vec<u8>>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut entries: Vec<Vec<u8>> = base
        .into_iter()
        .map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            entry
        })
        .collect();

    for pair in pairs {
        let pair = pair.as_bytes();
        let (key, value) = split_key(pair);
        let position = entries.iter().position(|entry| split_key(entry).0 == key);
        match (value, position) {
            (Some(_), Some(index)) => entries[index] = pair.to_vec(),
            (Some(_), None) => entries.push(pair.to_vec()),
            (None, Some(index)) => {
                entries.remove(index);
            }
            (None, None) => {}
        }
    }

    entries
}

fn split_key(entry: &[u8]) -> (&[u8], Option<&[u8]>) {
    match entry.iter().position(|&b| b == b'=') {
        Some(index) => (&entry[..index], Some(&entry[index + 1..])),
        None => (entry, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Vec<(OsString, OsString)> {
        vec![
            (OsString::from("HOME"), OsString::from("/root")),
            (OsString::from("PATH"), OsString::from("/bin")),
        ]
    }

    fn entries(plan: &EnvironmentPlan) -> Vec<String> {
        plan.entries()
            .iter()
            .map(|e| e.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn inherits_base_environment() {
        let plan = EnvironmentPlan::prepare_with(base(), &SpawnRequest::new("env")).unwrap();
        assert_eq!(entries(&plan), vec!["HOME=/root", "PATH=/bin"]);
    }

    #[test]
    fn appends_new_keys_in_order() {
        let request = SpawnRequest::new("env").env("FOO", "bar").env("BAZ", "1");
        let plan = EnvironmentPlan::prepare_with(base(), &request).unwrap();
        assert_eq!(
            entries(&plan),
            vec!["HOME=/root", "PATH=/bin", "FOO=bar", "BAZ=1"]
        );
    }

    #[test]
    fn later_pairs_override_earlier() {
        let request = SpawnRequest::new("env")
            .env("K", "1")
            .env("PATH", "/usr/bin")
            .env("K", "2");
        let plan = EnvironmentPlan::prepare_with(base(), &request).unwrap();
        assert_eq!(
            entries(&plan),
            vec!["HOME=/root", "PATH=/usr/bin", "K=2"]
        );
        assert_eq!(plan.get(b"K"), Some(&b"2"[..]));
    }

    #[test]
    fn pair_without_equals_removes_key() {
        let request = SpawnRequest::new("env").env_pair("HOME");
        let plan = EnvironmentPlan::prepare_with(base(), &request).unwrap();
        assert_eq!(entries(&plan), vec!["PATH=/bin"]);
        assert!(plan.get(b"HOME").is_none());
    }

    #[test]
    fn value_may_contain_equals() {
        let request = SpawnRequest::new("env").env_pair("OPTS=a=b");
        let plan = EnvironmentPlan::prepare_with(Vec::new(), &request).unwrap();
        assert_eq!(plan.get(b"OPTS"), Some(&b"a=b"[..]));
    }

    #[test]
    fn nul_byte_is_rejected() {
        let request = SpawnRequest::new("env").env_pair("BAD=a\0b");
        let result = EnvironmentPlan::prepare_with(Vec::new(), &request);
        assert!(matches!(result, Err(SpawnError::InvalidRequest(_))));
    }

    #[test]
    fn empty_cwd_is_not_entered() {
        let request = SpawnRequest::new("pwd").cwd("");
        let plan = EnvironmentPlan::prepare_with(Vec::new(), &request).unwrap();
        assert!(plan.cwd.is_none());
        assert!(plan.enter_workspace().is_ok());
    }

    #[test]
    fn cwd_is_kept() {
        let request = SpawnRequest::new("pwd").cwd("/tmp");
        let plan = EnvironmentPlan::prepare_with(Vec::new(), &request).unwrap();
        assert_eq!(plan.cwd.as_ref().unwrap().as_bytes(), b"/tmp");
    }
}
