//! # Replication
//!
//! Streams a database to a follower, either as whole-file copies or as
//! per-revision changesets, and replays both on the receiving side.
//!
//! ## Message Framing
//!
//! Every message is a type byte followed by a packed length and that
//! many payload bytes:
//!
//! ```text
//! 0 END_OF_CHANGES   follower is caught up
//! 1 FAIL             conversation abandoned (payload: reason)
//! 2 DB_HEADER        uuid + revision preceding a whole-DB copy
//! 3 DB_FILENAME      leaf name of the next file
//! 4 DB_FILEDATA      that file's contents
//! 5 DB_FOOTER        revision the follower must reach before the copy
//!                    is safe to make live
//! 6 CHANGESET        one changes<R> file verbatim
//! ```
//!
//! ## Conversation Shape
//!
//! The master prefers changesets: while the follower's revision trails
//! and the matching `changes<R>` file still exists, each file advances
//! the follower by one revision. A missing changeset (pruned, or the
//! follower is too old) forces a whole-database copy. Copies are capped
//! per conversation so a rapidly churning master cannot stall a
//! follower forever: past the cap the master sends FAIL and gives up.
//!
//! A UUID change observed after copying means the database was replaced
//! wholesale mid-copy; the footer then names an unreachable revision so
//! the follower will not go live on the torn copy, and the loop restarts.
//!
//! ## Deadlines
//!
//! Each send checks an optional deadline. Core table operations carry no
//! timeouts; replication is the only deadline-aware path.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::Instant;

use eyre::{ensure, Result, WrapErr};
use tracing::debug;

use crate::btree::Base;
use crate::config::{
    CHANGES_MAGIC, CHANGES_VERSION, MAX_DB_COPIES_PER_CONVERSATION, TABLE_NAMES,
    VERSION_FILE_NAME,
};
use crate::database::Database;
use crate::encoding::pack::{pack_uint, unpack_uint};
use crate::error::DbError;

pub const REPL_END_OF_CHANGES: u8 = 0;
pub const REPL_FAIL: u8 = 1;
pub const REPL_DB_HEADER: u8 = 2;
pub const REPL_DB_FILENAME: u8 = 3;
pub const REPL_DB_FILEDATA: u8 = 4;
pub const REPL_DB_FOOTER: u8 = 5;
pub const REPL_CHANGESET: u8 = 6;

/// Counters a replication conversation reports back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicationInfo {
    pub changeset_count: u32,
    pub fullcopy_count: u32,
    /// Whether the follower ended on a live, usable revision.
    pub changed: bool,
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    if let Some(deadline) = deadline {
        ensure!(Instant::now() < deadline, "replication deadline exceeded");
    }
    Ok(())
}

fn send_message(
    out: &mut dyn Write,
    code: u8,
    payload: &[u8],
    deadline: Option<Instant>,
) -> Result<()> {
    check_deadline(deadline)?;
    let mut frame = vec![code];
    pack_uint(&mut frame, payload.len() as u64);
    out.write_all(&frame)?;
    out.write_all(payload)?;
    Ok(())
}

fn read_message(input: &mut dyn Read) -> Result<(u8, Vec<u8>)> {
    let mut code = [0u8; 1];
    input.read_exact(&mut code)?;
    let mut len_bytes = Vec::new();
    let len = loop {
        let mut byte = [0u8; 1];
        input.read_exact(&mut byte)?;
        len_bytes.push(byte[0]);
        if byte[0] & 0x80 == 0 {
            break unpack_uint(&len_bytes)?.0;
        }
        ensure!(len_bytes.len() <= 10, "replication frame length corrupt");
    };
    let mut payload = vec![0u8; len as usize];
    input.read_exact(&mut payload)?;
    Ok((code[0], payload))
}

/// Reads the start and end revisions out of a changeset file header.
pub fn changeset_revisions(path: &Path) -> Result<(u32, u32)> {
    let data = fs::read(path)
        .wrap_err_with(|| format!("couldn't open changeset '{}' to read", path.display()))?;
    parse_changeset_header(&data)
        .wrap_err_with(|| format!("changeset at '{}'", path.display()))
}

fn parse_changeset_header(data: &[u8]) -> Result<(u32, u32)> {
    ensure!(
        data.len() > CHANGES_MAGIC.len() && data.starts_with(CHANGES_MAGIC),
        "changeset does not contain valid magic string"
    );
    let mut at = CHANGES_MAGIC.len();
    let (version, used) = unpack_uint(&data[at..])?;
    at += used;
    ensure!(
        version == u64::from(CHANGES_VERSION),
        "unsupported changeset version {}",
        version
    );
    let (start, used) = unpack_uint(&data[at..])?;
    at += used;
    let (end, _) = unpack_uint(&data[at..])?;
    Ok((start as u32, end as u32))
}

/// The file copy order for whole-database transfers. Postlist goes
/// last so it ends up best cached on the follower; the version file
/// closes the list.
fn copy_file_names() -> Vec<String> {
    let mut names = Vec::new();
    for table in ["termlist", "synonym", "spelling", "record", "position", "postlist"] {
        names.push(format!("{}.DB", table));
        names.push(format!("{}.baseA", table));
        names.push(format!("{}.baseB", table));
    }
    names.push(VERSION_FILE_NAME.to_owned());
    names
}

fn send_whole_database(
    db: &Database,
    out: &mut dyn Write,
    deadline: Option<Instant>,
) -> Result<()> {
    let uuid = db.get_uuid();
    let mut header = Vec::new();
    pack_uint(&mut header, uuid.len() as u64);
    header.extend_from_slice(uuid.as_bytes());
    pack_uint(&mut header, u64::from(db.get_revision_number()));
    send_message(out, REPL_DB_HEADER, &header, deadline)?;

    for leaf in copy_file_names() {
        let path = db.db_dir().join(&leaf);
        if !path.exists() {
            continue;
        }
        send_message(out, REPL_DB_FILENAME, leaf.as_bytes(), deadline)?;
        let contents = fs::read(&path)
            .wrap_err_with(|| format!("failed to read '{}'", path.display()))?;
        send_message(out, REPL_DB_FILEDATA, &contents, deadline)?;
    }
    Ok(())
}

/// Streams everything a follower at `revision_info` needs to catch up.
///
/// `revision_info` is the follower's packed revision (empty or garbage
/// forces a whole-database copy). The conversation ends with
/// END_OF_CHANGES once the follower is caught up, or FAIL if the
/// database churned through the whole-copy budget.
pub fn write_changesets_to_stream(
    db: &mut Database,
    out: &mut dyn Write,
    revision_info: &[u8],
    mut need_whole_db: bool,
    info: &mut ReplicationInfo,
    deadline: Option<Instant>,
) -> Result<()> {
    let mut copies_left = MAX_DB_COPIES_PER_CONVERSATION;
    let mut start_uuid = db.get_uuid();
    let mut needed_rev: u32 = 0;

    let mut start_rev: u32 = match unpack_uint(revision_info) {
        Ok((rev, used)) if used == revision_info.len() && u32::try_from(rev).is_ok() => rev as u32,
        _ => {
            need_whole_db = true;
            0
        }
    };

    loop {
        if need_whole_db {
            // Bound the number of copies so the conversation always
            // terminates, even against a fast writer.
            if copies_left == 0 {
                send_message(out, REPL_FAIL, b"Database changing too fast", deadline)?;
                return Ok(());
            }
            copies_left -= 1;

            start_rev = db.get_revision_number();
            start_uuid = db.get_uuid();
            send_whole_database(db, out, deadline)?;
            info.fullcopy_count += 1;
            need_whole_db = false;

            db.reopen()?;
            if start_uuid == db.get_uuid() {
                // The follower must replay up to the current revision
                // before the copy may go live.
                needed_rev = db.get_revision_number();
                let mut footer = Vec::new();
                pack_uint(&mut footer, u64::from(needed_rev));
                send_message(out, REPL_DB_FOOTER, &footer, deadline)?;
                if start_rev == needed_rev {
                    info.changed = true;
                }
            } else {
                // The database was replaced mid-copy. Name a revision
                // the follower will never reach so the torn copy can't
                // go live, then start over.
                let mut footer = Vec::new();
                pack_uint(&mut footer, u64::from(start_rev + 1));
                send_message(out, REPL_DB_FOOTER, &footer, deadline)?;
                need_whole_db = true;
            }
        } else {
            if start_rev >= db.get_revision_number() {
                db.reopen()?;
                if start_uuid != db.get_uuid() {
                    need_whole_db = true;
                    continue;
                }
                if start_rev >= db.get_revision_number() {
                    break;
                }
            }

            let changes_path = db.db_dir().join(format!("changes{}", start_rev));
            if changes_path.exists() {
                let (cs_start, cs_end) = changeset_revisions(&changes_path)?;
                if cs_start != start_rev {
                    return Err(DbError::Database(
                        "changeset start revision does not match changeset filename".into(),
                    )
                    .into());
                }
                if cs_start >= cs_end {
                    return Err(DbError::Database(
                        "changeset start revision is not less than end revision".into(),
                    )
                    .into());
                }
                let contents = fs::read(&changes_path)
                    .wrap_err_with(|| format!("failed to read '{}'", changes_path.display()))?;
                send_message(out, REPL_CHANGESET, &contents, deadline)?;
                debug!(from = cs_start, to = cs_end, "sent changeset");
                start_rev = cs_end;
                info.changeset_count += 1;
                if start_rev >= needed_rev {
                    info.changed = true;
                }
            } else {
                need_whole_db = true;
            }
        }
    }
    send_message(out, REPL_END_OF_CHANGES, b"", deadline)?;
    Ok(())
}

fn checked_table_name(name: &[u8]) -> Result<&'static str> {
    let name = std::str::from_utf8(name)
        .map_err(|_| DbError::Corrupt("changeset table name not utf-8".into()))?;
    TABLE_NAMES
        .iter()
        .find(|&&t| t == name)
        .copied()
        .ok_or_else(|| DbError::Corrupt(format!("changeset names unknown table '{}'", name)).into())
}

/// Replays one changeset onto the database directory, returning the
/// (start, end) revisions it declared. The caller is responsible for
/// checking that `start` matches the replica's current revision.
pub fn apply_changeset(db_dir: &Path, data: &[u8]) -> Result<(u32, u32)> {
    let (start, end) = parse_changeset_header(data)?;
    ensure!(start < end, "changeset revisions out of order");

    let mut at = CHANGES_MAGIC.len();
    // Skip the header fields we already parsed, then the danger byte.
    for _ in 0..3 {
        let (_, used) = unpack_uint(&data[at..])?;
        at += used;
    }
    let (dangerous, used) = unpack_uint(&data[at..])?;
    at += used;
    ensure!(dangerous <= 1, "changeset danger flag corrupt");

    while at < data.len() {
        match data[at] {
            b'B' => {
                at += 1;
                let (name_len, used) = unpack_uint(&data[at..])?;
                at += used;
                let name_len = name_len as usize;
                ensure!(at + name_len <= data.len(), "changeset truncated in table name");
                let name = checked_table_name(&data[at..at + name_len])?;
                at += name_len;
                let (block_size, used) = unpack_uint(&data[at..])?;
                at += used;
                let block_size = block_size as usize;
                ensure!(block_size > 0, "changeset block size corrupt");
                let (count, used) = unpack_uint(&data[at..])?;
                at += used;

                let path = db_dir.join(format!("{}.DB", name));
                let file = fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .wrap_err_with(|| format!("failed to open '{}'", path.display()))?;
                for _ in 0..count {
                    let (block_no, used) = unpack_uint(&data[at..])?;
                    at += used;
                    ensure!(
                        at + block_size <= data.len(),
                        "changeset truncated in block data"
                    );
                    let offset = block_no * block_size as u64;
                    let needed = offset + block_size as u64;
                    if file.metadata()?.len() < needed {
                        file.set_len(needed)?;
                    }
                    file.write_at(&data[at..at + block_size], offset)?;
                    at += block_size;
                }
                file.sync_all()?;
            }
            b'F' => {
                at += 1;
                let (name_len, used) = unpack_uint(&data[at..])?;
                at += used;
                let name_len = name_len as usize;
                ensure!(at + name_len <= data.len(), "changeset truncated in table name");
                let name = checked_table_name(&data[at..at + name_len])?;
                at += name_len;
                let (base_len, used) = unpack_uint(&data[at..])?;
                at += used;
                let base_len = base_len as usize;
                ensure!(at + base_len <= data.len(), "changeset truncated in base data");
                let base = Base::parse(&data[at..at + base_len])?;
                at += base_len;
                base.write_to_slot(db_dir, name)?;
            }
            0x00 => {
                at += 1;
                let (tail_rev, _) = unpack_uint(&data[at..])?;
                ensure!(
                    tail_rev == u64::from(end),
                    "changeset tail revision {} does not match declared end {}",
                    tail_rev,
                    end
                );
                debug!(start, end, "applied changeset");
                return Ok((start, end));
            }
            other => {
                return Err(DbError::Corrupt(format!(
                    "unknown changeset record type 0x{:02x}",
                    other
                ))
                .into())
            }
        }
    }
    Err(DbError::Corrupt("changeset missing post-commit tail".into()).into())
}

/// Consumes a replication conversation on the follower side,
/// materializing file copies and replaying changesets into `db_dir`.
pub fn apply_replication_stream(db_dir: &Path, input: &mut dyn Read) -> Result<ReplicationInfo> {
    if !db_dir.exists() {
        fs::create_dir_all(db_dir)
            .wrap_err_with(|| format!("failed to create '{}'", db_dir.display()))?;
    }

    let mut info = ReplicationInfo::default();
    let mut pending_name: Option<String> = None;
    let mut pending_copy_rev: Option<u32> = None;

    loop {
        let (code, payload) = read_message(input)?;
        match code {
            REPL_END_OF_CHANGES => break,
            REPL_FAIL => {
                return Err(DbError::Database(format!(
                    "replication failed: {}",
                    String::from_utf8_lossy(&payload)
                ))
                .into())
            }
            REPL_DB_HEADER => {
                // uuid + revision of the copy about to arrive. The
                // revision is what the follower will hold once the
                // files are materialized.
                let (uuid_len, used) = unpack_uint(&payload)?;
                let at = used + uuid_len as usize;
                ensure!(at <= payload.len(), "replication header truncated");
                let (copy_rev, _) = unpack_uint(&payload[at..])?;
                pending_copy_rev = Some(copy_rev as u32);
                info.fullcopy_count += 1;
            }
            REPL_DB_FILENAME => {
                let name = String::from_utf8(payload)
                    .map_err(|_| DbError::Corrupt("replicated file name not utf-8".into()))?;
                ensure!(
                    !name.contains('/') && !name.contains("..") && !name.is_empty(),
                    "replicated file name '{}' is not a plain leaf",
                    name
                );
                pending_name = Some(name);
            }
            REPL_DB_FILEDATA => {
                let name = pending_name
                    .take()
                    .ok_or_else(|| DbError::Corrupt("file data without a file name".into()))?;
                fs::write(db_dir.join(&name), &payload)
                    .wrap_err_with(|| format!("failed to write replicated file '{}'", name))?;
            }
            REPL_DB_FOOTER => {
                // Revision the copy must reach before going live. When
                // the copy already holds it, the copy alone made the
                // follower current (the master's start == needed case);
                // a higher number means changesets follow, or the copy
                // was torn and will be resent.
                let (needed_rev, _) = unpack_uint(&payload)?;
                if let Some(copy_rev) = pending_copy_rev.take() {
                    if u64::from(copy_rev) >= needed_rev {
                        info.changed = true;
                    }
                }
            }
            REPL_CHANGESET => {
                apply_changeset(db_dir, &payload)?;
                info.changeset_count += 1;
                info.changed = true;
            }
            other => {
                return Err(
                    DbError::Corrupt(format!("unknown replication message {}", other)).into(),
                )
            }
        }
    }
    Ok(info)
}
