//! National HRU ids across VPU partitions.
//!
//! Per-VPU parameter tables are ordered by the VPU token in their file
//! names. Each table's `nat_hru_id` is its local `hru_id` plus the number of
//! rows in all tables before it, so ids never collide between partitions.

use crate::io::table::Table;
use crate::types::{ParamError, ParamResult};
use std::path::{Path, PathBuf};

pub const NAT_ID_COLUMN: &str = "nat_hru_id";
pub const VPU_COLUMN: &str = "vpu";

/// A per-VPU parameter file and the VPU token of its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub vpu: String,
    pub path: PathBuf,
}

/// Parameter files of one source type, sorted by VPU token
pub fn discover<P: AsRef<Path>>(input_dir: P, source_type: &str) -> ParamResult<Vec<PartitionFile>> {
    let input_dir = input_dir.as_ref();
    if !input_dir.is_dir() {
        return Err(ParamError::MissingInput {
            path: input_dir.to_path_buf(),
        });
    }

    let prefix = format!("base_nhm_{}_", source_type);
    let suffix = "_param.csv";

    let mut files = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if let Some(vpu) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .filter(|token| !token.is_empty())
        {
            files.push(PartitionFile {
                vpu: vpu.to_string(),
                path: path.clone(),
            });
        }
    }

    files.sort_by(|a, b| a.vpu.cmp(&b.vpu));
    log::info!("Found {} {} parameter files in {}", files.len(), source_type, input_dir.display());
    Ok(files)
}

/// Add `nat_hru_id` and `vpu` to one table given the running offset.
///
/// Returns the offset for the next table.
pub fn assign_national_ids(table: &mut Table, vpu: &str, offset: i64) -> ParamResult<i64> {
    let local = table.int_column("hru_id")?;
    let national = local.iter().map(|id| (id + offset).to_string()).collect();
    table.set_column(NAT_ID_COLUMN, national)?;
    table.set_column(VPU_COLUMN, vec![vpu.to_string(); local.len()])?;
    Ok(offset + local.len() as i64)
}

/// Summary of a stitching run
#[derive(Debug, Clone)]
pub struct StitchSummary {
    pub files: Vec<PartitionFile>,
    pub total_rows: usize,
    pub merged: Table,
}

/// Rewrite every partition file with national ids and build the master table.
///
/// Files are rewritten in place, so rerunning replaces the columns rather
/// than duplicating them.
pub fn stitch(files: &[PartitionFile]) -> ParamResult<StitchSummary> {
    let (merged, total) = files.iter().try_fold(
        (Table::default(), 0i64),
        |(mut merged, offset), file| -> ParamResult<(Table, i64)> {
            log::info!("Processing file: {}", file.path.display());
            let mut table = Table::read(&file.path)?;
            let next = assign_national_ids(&mut table, &file.vpu, offset)?;
            table.write(&file.path)?;
            log::debug!("{}: {} rows, offset {} -> {}", file.vpu, table.len(), offset, next);

            merged.append(&table);
            Ok((merged, next))
        },
    )?;

    Ok(StitchSummary {
        files: files.to_vec(),
        total_rows: total as usize,
        merged,
    })
}
