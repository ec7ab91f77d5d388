//! Zonal statistics of a raster over polygons.
//!
//! Every raster cell overlapping a polygon contributes with the exact area
//! of the overlap, so partially covered edge cells count in proportion.
//! Missing cells contribute to neither the sum nor the weight.

use crate::core::geometry::{bounds_of, multipolygon_area_in_rect, CellRect};
use crate::io::table::{format_value, Table};
use crate::io::vector::PolygonFeature;
use crate::types::{ParamError, ParamResult, Raster};
use std::collections::BTreeMap;
use std::path::Path;

/// How polygon shards are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Serial,
    /// Split the polygons into `jobs` shards run on a dedicated worker pool
    Parallel { jobs: usize },
}

impl ExecutionMode {
    pub fn from_jobs(jobs: usize) -> Self {
        if jobs > 1 {
            ExecutionMode::Parallel { jobs }
        } else {
            ExecutionMode::Serial
        }
    }
}

/// Apply `work` to contiguous shards of `items` and concatenate the results
/// in shard order.
///
/// Shards share nothing mutable, so the output is identical whichever mode
/// runs them.
pub fn run_sharded<T, R, F>(items: &[T], mode: ExecutionMode, work: F) -> ParamResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> Vec<R> + Sync + Send,
{
    match mode {
        ExecutionMode::Serial => Ok(work(items)),
        ExecutionMode::Parallel { jobs } => run_parallel(items, jobs, work),
    }
}

#[cfg(feature = "parallel")]
fn run_parallel<T, R, F>(items: &[T], jobs: usize, work: F) -> ParamResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> Vec<R> + Sync + Send,
{
    use rayon::prelude::*;

    if items.is_empty() {
        return Ok(Vec::new());
    }
    let jobs = jobs.max(1);
    let shard_size = (items.len() + jobs - 1) / jobs;
    log::debug!("Running {} items in shards of {} on {} workers", items.len(), shard_size, jobs);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| ParamError::Processing(format!("Failed to build worker pool: {}", e)))?;

    let shards: Vec<Vec<R>> = pool.install(|| items.par_chunks(shard_size).map(|shard| work(shard)).collect());
    Ok(shards.into_iter().flatten().collect())
}

#[cfg(not(feature = "parallel"))]
fn run_parallel<T, R, F>(items: &[T], _jobs: usize, work: F) -> ParamResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> Vec<R> + Sync + Send,
{
    log::debug!("Built without the parallel feature; running serially");
    Ok(work(items))
}

/// Statistics of one polygon
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRow {
    pub id: i64,
    /// Valid cells touching the polygon
    pub count: usize,
    /// Area-weighted mean; `NaN` without valid cells or in categorical mode
    pub mean: f64,
    /// Area fraction per category; empty in continuous mode
    pub fractions: BTreeMap<i64, f64>,
}

impl ZonalRow {
    /// Category with the largest fraction; the lowest code wins a tie
    pub fn dominant(&self) -> Option<i64> {
        let mut best: Option<(i64, f64)> = None;
        for (&category, &fraction) in &self.fractions {
            match best {
                Some((_, top)) if fraction <= top => {}
                _ => best = Some((category, fraction)),
            }
        }
        best.map(|(category, _)| category)
    }
}

/// Zonal statistics engine
pub struct ZonalEngine {
    mode: ExecutionMode,
}

impl ZonalEngine {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    /// One row per polygon, in input order.
    ///
    /// Polygons must be in the raster's CRS.
    pub fn calculate(
        &self,
        raster: &Raster,
        polygons: &[PolygonFeature],
        categorical: bool,
    ) -> ParamResult<Vec<ZonalRow>> {
        if !raster.transform.is_north_up() {
            return Err(ParamError::Processing(
                "zonal statistics need a north-up raster".to_string(),
            ));
        }

        log::info!(
            "Zonal statistics over {} polygons ({}, {:?})",
            polygons.len(),
            if categorical { "categorical" } else { "continuous" },
            self.mode
        );

        let rows = run_sharded(polygons, self.mode, |shard| {
            shard
                .iter()
                .map(|polygon| zonal_row(raster, polygon, categorical))
                .collect()
        })?;

        let empty = rows.iter().filter(|r| r.count == 0).count();
        if empty > 0 {
            log::warn!("{} polygons overlap no valid cells", empty);
        }
        Ok(rows)
    }

    /// [`calculate`](Self::calculate), also persisting the rows to `scratch`
    pub fn calculate_to_file<P: AsRef<Path>>(
        &self,
        raster: &Raster,
        polygons: &[PolygonFeature],
        categorical: bool,
        id_column: &str,
        scratch: P,
    ) -> ParamResult<Vec<ZonalRow>> {
        let rows = self.calculate(raster, polygons, categorical)?;
        zonal_table(&rows, categorical, id_column).write(scratch)?;
        Ok(rows)
    }
}

/// Tabulate rows: `id, mean, count` or `id, count, <category>...`
pub fn zonal_table(rows: &[ZonalRow], categorical: bool, id_column: &str) -> Table {
    if !categorical {
        let mut table = Table::new([id_column, "mean", "count"]);
        for row in rows {
            table.push_row(vec![row.id.to_string(), format_value(row.mean), row.count.to_string()]);
        }
        return table;
    }

    let categories: Vec<i64> = rows
        .iter()
        .flat_map(|r| r.fractions.keys().copied())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut headers = vec![id_column.to_string(), "count".to_string()];
    headers.extend(categories.iter().map(|c| c.to_string()));
    let mut table = Table::new(headers);
    for row in rows {
        let mut cells = vec![row.id.to_string(), row.count.to_string()];
        cells.extend(
            categories
                .iter()
                .map(|c| format_value(row.fractions.get(c).copied().unwrap_or(0.0))),
        );
        table.push_row(cells);
    }
    table
}

fn zonal_row(raster: &Raster, polygon: &PolygonFeature, categorical: bool) -> ZonalRow {
    let mut row = ZonalRow {
        id: polygon.id,
        count: 0,
        mean: f64::NAN,
        fractions: BTreeMap::new(),
    };

    let bounds = match bounds_of(&polygon.geometry) {
        Some(b) => b,
        None => return row,
    };
    let (row_range, col_range) = match cell_window(raster, &bounds) {
        Some(w) => w,
        None => return row,
    };

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut category_weight: BTreeMap<i64, f64> = BTreeMap::new();

    for r in row_range {
        for c in col_range.clone() {
            let value = match raster.value(r, c) {
                Some(v) => v,
                None => continue,
            };
            let cell = CellRect::from_bounds(raster.transform.cell_bounds(r, c));
            if !cell.intersects(&bounds) {
                continue;
            }
            let overlap = multipolygon_area_in_rect(&polygon.geometry, &cell);
            if overlap <= 0.0 {
                continue;
            }

            row.count += 1;
            total_weight += overlap;
            if categorical {
                *category_weight.entry(value.round() as i64).or_insert(0.0) += overlap;
            } else {
                weighted_sum += value * overlap;
            }
        }
    }

    if total_weight > 0.0 {
        if categorical {
            row.fractions = category_weight
                .into_iter()
                .map(|(category, w)| (category, w / total_weight))
                .collect();
        } else {
            row.mean = weighted_sum / total_weight;
        }
    }
    row
}

/// Row and column ranges of the cells under `bounds`, clamped to the grid
fn cell_window(
    raster: &Raster,
    bounds: &CellRect,
) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let (rows, cols) = raster.shape();
    let (r_top, c_left) = raster.transform.to_pixel(bounds.min_x, bounds.max_y);
    let (r_bottom, c_right) = raster.transform.to_pixel(bounds.max_x, bounds.min_y);

    let r0 = r_top.min(r_bottom).floor().max(0.0);
    let r1 = r_top.max(r_bottom).ceil().min(rows as f64);
    let c0 = c_left.min(c_right).floor().max(0.0);
    let c1 = c_left.max(c_right).ceil().min(cols as f64);

    if r0 >= r1 || c0 >= c1 {
        return None;
    }
    Some((r0 as usize..r1 as usize, c0 as usize..c1 as usize))
}
