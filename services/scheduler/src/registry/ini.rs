//! Reading and writing the engine's sectioned job file.
//!
//! ```ini
//! [job-exec "job7"]
//! schedule = @every 30s
//! command = python fetch.py --subscriptionID 12
//! container = system-worker-1
//! ```
//!
//! Sections other than `job-exec "jobN"` are kept verbatim.

use pollmesh_id::{JobName, WorkerId};
use tracing::warn;

use super::{JobEntry, RegistryError};

const JOB_SECTION_PREFIX: &str = "job-exec \"";

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Job(JobEntry),
    Other { header: String, body: Vec<String> },
}

/// Parsed registry file, preserving section order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RegistryFile {
    preamble: Vec<String>,
    blocks: Vec<Block>,
}

impl RegistryFile {
    pub(crate) fn parse(text: &str) -> Result<Self, RegistryError> {
        let mut file = RegistryFile::default();
        let mut current: Option<(String, Vec<String>)> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(header) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                if let Some((header, body)) = current.take() {
                    file.blocks.push(to_block(header, body)?);
                }
                current = Some((header.trim().to_string(), Vec::new()));
                continue;
            }
            match current.as_mut() {
                Some((_, body)) => body.push(line.to_string()),
                None => file.preamble.push(line.to_string()),
            }
        }
        if let Some((header, body)) = current.take() {
            file.blocks.push(to_block(header, body)?);
        }
        trim_trailing_blank(&mut file.preamble);

        Ok(file)
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        if !self.preamble.is_empty() && !self.blocks.is_empty() {
            out.push('\n');
        }

        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match block {
                Block::Job(entry) => {
                    out.push_str(&format!("[{JOB_SECTION_PREFIX}{}\"]\n", entry.name));
                    out.push_str(&format!("schedule = @every {}s\n", entry.interval_secs));
                    out.push_str(&format!("command = {}\n", entry.command));
                    if let Some(worker) = entry.assigned_worker {
                        out.push_str(&format!("container = {worker}\n"));
                    }
                }
                Block::Other { header, body } => {
                    out.push_str(&format!("[{header}]\n"));
                    for line in body {
                        out.push_str(line);
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    pub(crate) fn jobs(&self) -> Vec<JobEntry> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Job(entry) => Some(entry.clone()),
                Block::Other { .. } => None,
            })
            .collect()
    }

    /// Replaces the job with the same name in place, or appends it.
    pub(crate) fn upsert(&mut self, entry: JobEntry) {
        let existing = self.blocks.iter_mut().find_map(|block| match block {
            Block::Job(current) if current.name == entry.name => Some(current),
            _ => None,
        });
        match existing {
            Some(current) => *current = entry,
            None => self.blocks.push(Block::Job(entry)),
        }
    }

    /// Removes the named job, returning whether it was present.
    pub(crate) fn remove(&mut self, name: JobName) -> bool {
        let before = self.blocks.len();
        self.blocks
            .retain(|block| !matches!(block, Block::Job(entry) if entry.name == name));
        self.blocks.len() != before
    }

    /// Drops every job section and appends `entries` in order.
    pub(crate) fn set_jobs(&mut self, entries: &[JobEntry]) {
        self.blocks.retain(|block| matches!(block, Block::Other { .. }));
        self.blocks
            .extend(entries.iter().cloned().map(Block::Job));
    }
}

fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
}

fn to_block(header: String, mut body: Vec<String>) -> Result<Block, RegistryError> {
    trim_trailing_blank(&mut body);

    let Some(quoted) = header.strip_prefix(JOB_SECTION_PREFIX) else {
        return Ok(Block::Other { header, body });
    };
    let Some(name) = quoted
        .strip_suffix('"')
        .and_then(|raw| raw.parse::<JobName>().ok())
    else {
        warn!(section = %header, "Keeping job section with an unrecognised name as-is");
        return Ok(Block::Other { header, body });
    };

    let malformed = |message: String| RegistryError::Malformed {
        section: header.clone(),
        message,
    };

    let mut schedule = None;
    let mut command = None;
    let mut container = None;
    for line in &body {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(malformed(format!("expected 'key = value', got '{line}'")));
        };
        let value = value.trim().to_string();
        match key.trim() {
            "schedule" => schedule = Some(value),
            "command" => command = Some(value),
            "container" => container = Some(value),
            _ => {}
        }
    }

    let schedule = schedule.ok_or_else(|| malformed("missing 'schedule'".to_string()))?;
    let interval_secs = parse_every(&schedule)
        .ok_or_else(|| malformed(format!("unsupported schedule '{schedule}'")))?;
    let command = command.ok_or_else(|| malformed("missing 'command'".to_string()))?;
    let assigned_worker = match container.filter(|c| !c.is_empty()) {
        Some(raw) => Some(
            raw.parse::<WorkerId>()
                .map_err(|e| malformed(format!("bad container '{raw}': {e}")))?,
        ),
        None => None,
    };

    Ok(Block::Job(JobEntry {
        name,
        interval_secs,
        command,
        assigned_worker,
    }))
}

/// Parses `@every 30s` (also `m` and `h` units) into seconds.
fn parse_every(schedule: &str) -> Option<u64> {
    let spec = schedule.trim().strip_prefix("@every")?.trim();
    let split = spec.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = spec.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return None,
    };
    amount.checked_mul(scale).filter(|secs| *secs > 0)
}
