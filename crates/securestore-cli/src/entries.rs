use std::io::{BufRead, Write};

use color_eyre::{eyre::eyre, Result};
use securestore_core::{EntryKey, SecureStore};

use crate::cli::{EntryCommand, KeyArgs};

/// Execute an entry subcommand against `store`, writing results to `out`.
/// `input` supplies the value for `set` when it is not given on the command line.
pub fn handle<S: SecureStore + ?Sized>(
    store: &S,
    cmd: EntryCommand,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        EntryCommand::Get { key, all } => {
            let subsection = key.subsection.as_deref();
            if all {
                let values = store
                    .get_list(&key.section, subsection, &key.name)
                    .map_err(report)?
                    .ok_or_else(|| not_found(&key))?;
                for value in values {
                    writeln!(out, "{value}")?;
                }
            } else {
                let value = store
                    .get(&key.section, subsection, &key.name)
                    .map_err(report)?
                    .ok_or_else(|| not_found(&key))?;
                writeln!(out, "{value}")?;
            }
        }
        EntryCommand::Set { key, value } => {
            let value = match value {
                Some(value) => value,
                None => read_value(input)?,
            };
            store
                .set(&key.section, key.subsection.as_deref(), &key.name, Some(&value))
                .map_err(report)?;
        }
        EntryCommand::SetList { key, values } => {
            store
                .set_list(&key.section, key.subsection.as_deref(), &key.name, &values)
                .map_err(report)?;
        }
        EntryCommand::Unset { key } => {
            store
                .unset(&key.section, key.subsection.as_deref(), &key.name)
                .map_err(report)?;
        }
        EntryCommand::List { json } => {
            let keys = store.list().map_err(report)?;
            if json {
                let keys: Vec<&EntryKey> = keys.iter().collect();
                writeln!(out, "{}", serde_json::to_string_pretty(&keys)?)?;
            } else {
                for key in keys {
                    writeln!(out, "{key}")?;
                }
            }
        }
    }
    Ok(())
}

/// Read one line, dropping the trailing newline.
fn read_value(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let trimmed = line.strip_suffix('\n').unwrap_or(&line);
    Ok(trimmed.strip_suffix('\r').unwrap_or(trimmed).to_string())
}

fn not_found(key: &KeyArgs) -> color_eyre::eyre::Report {
    let key = EntryKey::from_parts(&key.section, key.subsection.as_deref(), &key.name);
    eyre!("no value stored for {key}")
}

fn report(err: securestore_core::SecureStoreError) -> color_eyre::eyre::Report {
    eyre!(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use securestore_core::InMemorySecureStore;

    use super::*;

    fn key(section: &str, name: &str, subsection: Option<&str>) -> KeyArgs {
        KeyArgs {
            section: section.into(),
            name: name.into(),
            subsection: subsection.map(Into::into),
        }
    }

    fn run(store: &InMemorySecureStore, cmd: EntryCommand, stdin: &str) -> Result<String> {
        let mut out = Vec::new();
        handle(store, cmd, &mut Cursor::new(stdin.as_bytes()), &mut out)?;
        Ok(String::from_utf8(out).expect("utf-8 output"))
    }

    #[test]
    fn set_from_stdin_then_get() {
        let store = InMemorySecureStore::new();
        run(
            &store,
            EntryCommand::Set {
                key: key("auth", "password", None),
                value: None,
            },
            "hunter2\r\n",
        )
        .expect("set");

        let out = run(
            &store,
            EntryCommand::Get {
                key: key("auth", "password", None),
                all: false,
            },
            "",
        )
        .expect("get");
        assert_eq!(out, "hunter2\n");
    }

    #[test]
    fn get_all_prints_each_value() {
        let store = InMemorySecureStore::new();
        run(
            &store,
            EntryCommand::SetList {
                key: key("remote", "token", Some("origin")),
                values: vec!["a".into(), "b".into()],
            },
            "",
        )
        .expect("set-list");

        let out = run(
            &store,
            EntryCommand::Get {
                key: key("remote", "token", Some("origin")),
                all: true,
            },
            "",
        )
        .expect("get");
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn missing_key_is_an_error() {
        let store = InMemorySecureStore::new();
        let err = run(
            &store,
            EntryCommand::Get {
                key: key("auth", "password", None),
                all: false,
            },
            "",
        )
        .expect_err("missing");
        assert!(err.to_string().contains("auth.password"));
    }

    #[test]
    fn list_never_prints_values() {
        let store = InMemorySecureStore::new();
        store.set("auth", None, "password", Some("hunter2")).expect("set");
        store.set("auth", Some("host"), "token", Some("t0k")).expect("set");

        let plain = run(&store, EntryCommand::List { json: false }, "").expect("list");
        assert_eq!(plain, "auth.password\nauth.host.token\n");

        let json = run(&store, EntryCommand::List { json: true }, "").expect("list");
        let parsed: Vec<EntryKey> = serde_json::from_str(&json).expect("json");
        assert_eq!(parsed.len(), 2);
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn unset_removes_entry() {
        let store = InMemorySecureStore::new();
        store.set("auth", None, "password", Some("x")).expect("set");
        run(
            &store,
            EntryCommand::Unset {
                key: key("auth", "password", None),
            },
            "",
        )
        .expect("unset");
        assert_eq!(store.get("auth", None, "password").expect("get"), None);
    }
}
