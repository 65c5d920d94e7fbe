//! Shard discovery and grouping.
//!
//! Layout: `{dataset_root}/{YYYY}/{YYYY-MM-DD|YYYY-MM|YYYY}.{ext}`
//!
//! The catalog only reads directory listings. Anything that is not a shard of
//! the requested tier is skipped without error: raw `.txt` sources, staged
//! `.tmp` candidates, already consolidated artifacts, dotfiles.

use crate::window::{Granularity, WindowKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Consolidation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Day shards → one month artifact.
    Monthly,
    /// Month shards → one year artifact.
    Yearly,
}

impl Tier {
    /// Granularity of the shards this tier consumes.
    pub fn input_granularity(&self) -> Granularity {
        match self {
            Tier::Monthly => Granularity::Day,
            Tier::Yearly => Granularity::Month,
        }
    }

    pub fn output_granularity(&self) -> Granularity {
        match self {
            Tier::Monthly => Granularity::Month,
            Tier::Yearly => Granularity::Year,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Monthly => f.write_str("monthly"),
            Tier::Yearly => f.write_str("yearly"),
        }
    }
}

/// Shard paths grouped by the window they consolidate into.
pub type WindowGroups = BTreeMap<WindowKey, Vec<PathBuf>>;

/// Catalog of shard files under one dataset root (e.g. `data/KR-1d`).
#[derive(Debug, Clone)]
pub struct ShardCatalog {
    root: PathBuf,
    extension: String,
}

impl ShardCatalog {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Year directories under the root, ascending. Non-year names are skipped.
    pub fn year_dirs(&self) -> io::Result<Vec<(i32, PathBuf)>> {
        let mut years = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let key = name.to_str().and_then(|n| WindowKey::parse(n).parsed());
            if let Some(WindowKey::Year(year)) = key {
                years.push((year, entry.path()));
            }
        }
        years.sort();
        Ok(years)
    }

    /// Group one year directory's shards by target window.
    pub fn groups_in_year(&self, tier: Tier, year_dir: &Path) -> io::Result<WindowGroups> {
        let mut groups = WindowGroups::new();
        for entry in fs::read_dir(year_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(window) = self.window_for(tier, &path) {
                groups.entry(window).or_default().push(path);
            }
        }

        if tier == Tier::Yearly {
            for (window, paths) in groups.iter_mut() {
                if let Some(flat) = self.flat_year_artifact(window.year()) {
                    paths.push(flat);
                }
            }
        }

        for paths in groups.values_mut() {
            paths.sort();
        }
        Ok(groups)
    }

    /// Group every year directory's shards by target window.
    pub fn groups(&self, tier: Tier) -> io::Result<WindowGroups> {
        let mut all = WindowGroups::new();
        for (_, year_dir) in self.year_dirs()? {
            for (window, mut paths) in self.groups_in_year(tier, &year_dir)? {
                let slot = all.entry(window).or_default();
                slot.append(&mut paths);
                slot.sort();
                slot.dedup();
            }
        }
        Ok(all)
    }

    /// Where the consolidated artifact for `window` lives:
    /// `{root}/{YYYY}/{window}.{ext}`.
    pub fn target_path(&self, window: &WindowKey) -> PathBuf {
        self.root
            .join(format!("{:04}", window.year()))
            .join(format!("{window}.{}", self.extension))
    }

    /// Legacy flat year artifact at `{root}/{YYYY}.{ext}`, if present.
    pub fn flat_year_artifact(&self, year: i32) -> Option<PathBuf> {
        let path = self.root.join(format!("{year:04}.{}", self.extension));
        path.is_file().then_some(path)
    }

    /// The window `path` consolidates into under `tier`, if it is a shard of
    /// that tier's input granularity.
    fn window_for(&self, tier: Tier, path: &Path) -> Option<WindowKey> {
        if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
            return None;
        }
        let key = WindowKey::from_path(path).parsed()?;
        if key.granularity() != tier.input_granularity() {
            return None;
        }
        key.parent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn monthly_groups_days_by_month() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["2020-01-03", "2020-01-01", "2020-02-10", "2020-01-02"] {
            touch(&root.join("2020").join(format!("{name}.parquet")));
        }

        let catalog = ShardCatalog::new(root, "parquet");
        let groups = catalog.groups(Tier::Monthly).unwrap();

        assert_eq!(groups.len(), 2);
        let jan = &groups[&WindowKey::Month { year: 2020, month: 1 }];
        let names: Vec<_> = jan
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["2020-01-01.parquet", "2020-01-02.parquet", "2020-01-03.parquet"]
        );
    }

    #[test]
    fn skips_noise_silently() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("2020/2020-01-01.parquet"));
        touch(&root.join("2020/2020-01-01.txt"));
        touch(&root.join("2020/2020-01.parquet.tmp"));
        touch(&root.join("2020/2020-01.parquet"));
        touch(&root.join("2020/.2020-01-02.parquet"));
        touch(&root.join("2020/2020-13-01.parquet"));
        touch(&root.join("2020/readme.parquet"));
        touch(&root.join("misc/2020-01-05.parquet"));
        touch(&root.join("notes.txt"));
        fs::create_dir_all(root.join("2020/2020-01-09.parquet")).unwrap();

        let catalog = ShardCatalog::new(root, "parquet");
        let groups = catalog.groups(Tier::Monthly).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&WindowKey::Month { year: 2020, month: 1 }].len(), 1);
    }

    #[test]
    fn yearly_groups_months_and_ignores_days() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["2020-03", "2020-01", "2020-02", "2020-04-01", "2021-01"] {
            touch(&root.join(&name[..4]).join(format!("{name}.parquet")));
        }
        touch(&root.join("2020/2020.parquet"));

        let catalog = ShardCatalog::new(root, "parquet");
        let groups = catalog.groups(Tier::Yearly).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&WindowKey::Year(2020)].len(), 3);
        assert_eq!(groups[&WindowKey::Year(2021)].len(), 1);
    }

    #[test]
    fn yearly_includes_flat_year_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("2019/2019-12.parquet"));
        touch(&root.join("2019.parquet"));

        let catalog = ShardCatalog::new(root, "parquet");
        let groups = catalog.groups(Tier::Yearly).unwrap();

        let inputs = &groups[&WindowKey::Year(2019)];
        assert_eq!(inputs.len(), 2);
        assert!(inputs.contains(&root.join("2019.parquet")));
    }

    #[test]
    fn year_dirs_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["2021", "2019", "20x0", "2020-01"] {
            fs::create_dir_all(root.join(name)).unwrap();
        }
        touch(&root.join("2022"));

        let years: Vec<i32> = ShardCatalog::new(root, "parquet")
            .year_dirs()
            .unwrap()
            .into_iter()
            .map(|(y, _)| y)
            .collect();
        assert_eq!(years, vec![2019, 2021]);
    }

    #[test]
    fn target_paths() {
        let catalog = ShardCatalog::new("/data/KR-1d", "parquet");
        assert_eq!(
            catalog.target_path(&WindowKey::Month { year: 2024, month: 3 }),
            PathBuf::from("/data/KR-1d/2024/2024-03.parquet")
        );
        assert_eq!(
            catalog.target_path(&WindowKey::Year(2024)),
            PathBuf::from("/data/KR-1d/2024/2024.parquet")
        );
    }
}
