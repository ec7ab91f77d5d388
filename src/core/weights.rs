use crate::core::zonal::{run_sharded, ExecutionMode};
use crate::io::table::{format_value, parse_id, Table};
use crate::io::vector::PolygonFeature;
use crate::types::{ParamError, ParamResult};
use geo::{Area, BooleanOps, BoundingRect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::path::Path;

type IndexedRect = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Intersection of one target polygon with one source polygon
#[derive(Debug, Clone, PartialEq)]
pub struct WeightRow {
    pub target_id: i64,
    pub source_id: i64,
    /// Area of the intersection
    pub area_weight: f64,
    /// Total area of the source polygon
    pub source_area: f64,
    /// Total area of the target polygon
    pub target_area: f64,
}

/// Column names of a weight table
#[derive(Debug, Clone)]
pub struct WeightColumns {
    pub target_id: String,
    pub source_id: String,
}

impl WeightColumns {
    pub fn new(target_id: &str, source_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            source_id: source_id.to_string(),
        }
    }

    fn headers(&self) -> [String; 5] {
        [
            self.target_id.clone(),
            self.source_id.clone(),
            "area_weight".to_string(),
            format!("{}_area", self.source_id),
            format!("{}_area", self.target_id),
        ]
    }
}

/// Polygon-to-polygon areal weights
pub struct WeightEngine {
    mode: ExecutionMode,
}

impl WeightEngine {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    /// Load cached weights when `cache` exists, otherwise compute and persist them
    pub fn weights_cached<P: AsRef<Path>>(
        &self,
        targets: &[PolygonFeature],
        sources: &[PolygonFeature],
        columns: &WeightColumns,
        cache: P,
    ) -> ParamResult<Vec<WeightRow>> {
        let cache = cache.as_ref();
        if cache.exists() {
            log::info!("Loading cached weights: {}", cache.display());
            return read_weights(cache, columns);
        }

        let rows = self.calculate(targets, sources)?;
        write_weights(&rows, columns, cache)?;
        Ok(rows)
    }

    /// Every non-empty target/source intersection, in target order.
    ///
    /// Geometries must already share one projected CRS.
    pub fn calculate(
        &self,
        targets: &[PolygonFeature],
        sources: &[PolygonFeature],
    ) -> ParamResult<Vec<WeightRow>> {
        log::info!(
            "Calculating weights: {} targets x {} sources ({:?})",
            targets.len(),
            sources.len(),
            self.mode
        );

        let source_areas: Vec<f64> = sources.iter().map(|s| s.geometry.unsigned_area()).collect();
        let index: Vec<IndexedRect> = sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.geometry
                    .bounding_rect()
                    .map(|r| GeomWithData::new(Rectangle::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]), i))
            })
            .collect();
        let tree = RTree::bulk_load(index);

        let weigh = |target: &PolygonFeature| -> Vec<WeightRow> {
            let bounds = match target.geometry.bounding_rect() {
                Some(b) => b,
                None => return Vec::new(),
            };
            let target_area = target.geometry.unsigned_area();
            let envelope = AABB::from_corners([bounds.min().x, bounds.min().y], [bounds.max().x, bounds.max().y]);

            let mut candidates: Vec<usize> = tree
                .locate_in_envelope_intersecting(&envelope)
                .map(|c| c.data)
                .collect();
            candidates.sort_unstable();

            candidates
                .into_iter()
                .filter_map(|i| {
                    let source = &sources[i];
                    let overlap = target.geometry.intersection(&source.geometry).unsigned_area();
                    (overlap > 0.0).then(|| WeightRow {
                        target_id: target.id,
                        source_id: source.id,
                        area_weight: overlap,
                        source_area: source_areas[i],
                        target_area,
                    })
                })
                .collect()
        };

        let rows: Vec<WeightRow> = run_sharded(targets, self.mode, |shard| {
            shard.iter().flat_map(|t| weigh(t)).collect()
        })?;

        log::info!("Computed {} weight rows", rows.len());
        Ok(rows)
    }
}

pub fn write_weights<P: AsRef<Path>>(rows: &[WeightRow], columns: &WeightColumns, path: P) -> ParamResult<()> {
    let mut table = Table::new(columns.headers());
    for row in rows {
        table.push_row(vec![
            row.target_id.to_string(),
            row.source_id.to_string(),
            format_value(row.area_weight),
            format_value(row.source_area),
            format_value(row.target_area),
        ]);
    }
    table.write(path)
}

pub fn read_weights<P: AsRef<Path>>(path: P, columns: &WeightColumns) -> ParamResult<Vec<WeightRow>> {
    let path = path.as_ref();
    let table = Table::read(path)?;
    let [target, source, weight, source_area, target_area] = columns.headers();
    let idx = [
        table.require_column(&target)?,
        table.require_column(&source)?,
        table.require_column(&weight)?,
        table.require_column(&source_area)?,
        table.require_column(&target_area)?,
    ];

    let id_at = |row: &[String], i: usize| -> ParamResult<i64> {
        parse_id(&row[i]).ok_or_else(|| ParamError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("'{}' is not an integer id", row[i]),
        })
    };

    table
        .rows
        .iter()
        .map(|row| {
            Ok(WeightRow {
                target_id: id_at(row, idx[0])?,
                source_id: id_at(row, idx[1])?,
                area_weight: crate::io::table::parse_value(&row[idx[2]]),
                source_area: crate::io::table::parse_value(&row[idx[3]]),
                target_area: crate::io::table::parse_value(&row[idx[4]]),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};
    use tempfile::TempDir;

    fn square(id: i64, x0: f64, y0: f64, size: f64) -> PolygonFeature {
        let p = polygon![
            (x: x0, y: y0), (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size), (x: x0, y: y0 + size)
        ];
        PolygonFeature::new(id, MultiPolygon(vec![p]))
    }

    fn sources() -> Vec<PolygonFeature> {
        // 4x4 grid of 10 m lithology squares
        (0..16)
            .map(|i| square(i, (i % 4) as f64 * 10.0, (i / 4) as f64 * 10.0, 10.0))
            .collect()
    }

    #[test]
    fn test_enclosed_target_weights_sum_to_area() {
        let targets = vec![square(1, 3.0, 4.0, 25.0), square(2, 31.0, 31.0, 5.0)];
        let rows = WeightEngine::new(ExecutionMode::Serial)
            .calculate(&targets, &sources())
            .unwrap();

        let sum_1: f64 = rows.iter().filter(|r| r.target_id == 1).map(|r| r.area_weight).sum();
        assert_relative_eq!(sum_1, 625.0, max_relative = 1e-6);
        let only_2: Vec<_> = rows.iter().filter(|r| r.target_id == 2).collect();
        assert_eq!(only_2.len(), 1);
        assert_eq!(only_2[0].source_id, 15);
        assert_relative_eq!(only_2[0].source_area, 100.0);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let targets: Vec<_> = (0..9).map(|i| square(i, i as f64 * 4.0, i as f64 * 3.0, 7.0)).collect();
        let serial = WeightEngine::new(ExecutionMode::Serial).calculate(&targets, &sources()).unwrap();
        let parallel = WeightEngine::new(ExecutionMode::Parallel { jobs: 3 })
            .calculate(&targets, &sources())
            .unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_cache_is_written_then_reused() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("lith_weights_vpu_01.csv");
        let columns = WeightColumns::new("hru_id", "flux_id");
        let engine = WeightEngine::new(ExecutionMode::Serial);

        let first = engine.weights_cached(&[square(1, 0.0, 0.0, 15.0)], &sources(), &columns, &cache).unwrap();
        let header = std::fs::read_to_string(&cache).unwrap();
        assert!(header.starts_with("hru_id,flux_id,area_weight,flux_id_area,hru_id_area\n"));

        // Different targets: the cache must win
        let second = engine.weights_cached(&[], &sources(), &columns, &cache).unwrap();
        assert_eq!(first, second);
    }
}
