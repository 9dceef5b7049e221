//! 一致性检查：只报告，不修复。

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{Error, Image, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// 超级块记录的空闲扇区数
    pub free_recorded: u32,
    /// 分配表中实际为空闲的数据扇区数
    pub free_counted: u32,
    pub files: u32,
    /// 不含根目录
    pub directories: u32,
    /// 可从根目录到达的数据扇区数
    pub used_sectors: u32,
    pub problems: Vec<String>,
}

impl CheckReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} files, {} directories, {} sectors in use",
            self.files, self.directories, self.used_sectors
        )?;
        writeln!(
            f,
            "free sectors: {} recorded, {} counted",
            self.free_recorded, self.free_counted
        )?;
        if self.is_clean() {
            write!(f, "no problems found")
        } else {
            write!(f, "{} problems:", self.problems.len())?;
            for problem in &self.problems {
                write!(f, "\n  {problem}")?;
            }
            Ok(())
        }
    }
}

/// 待检查的目录
struct Pending {
    path: String,
    first: u32,
    /// 目录项中记录的子项个数，根目录没有
    size: Option<u32>,
}

impl Image {
    pub fn check(&self) -> Result<CheckReport> {
        let sb = *self.superblock();
        let mut report = CheckReport {
            free_recorded: sb.free_sectors,
            ..Default::default()
        };

        for sector in sb.data_region() {
            if self.get_fat_entry(sector)?.is_free() {
                report.free_counted += 1;
            }
        }
        if report.free_counted != report.free_recorded {
            report.problems.push(format!(
                "superblock records {} free sectors but the table has {}",
                report.free_recorded, report.free_counted
            ));
        }

        // 扇区 -> 占用它的路径
        let mut owners = BTreeMap::new();
        let mut stack = vec![Pending {
            path: String::new(),
            first: sb.root_sector,
            size: None,
        }];

        while let Some(dir) = stack.pop() {
            let shown = if dir.path.is_empty() { "/" } else { dir.path.as_str() };
            // 链表有问题的目录不再深入，以免重复报告或陷入环
            if self.claim(dir.first, shown, &mut owners, &mut report)?.is_none() {
                continue;
            }
            let entries = match self.read_directory(dir.first) {
                Ok(entries) => entries,
                Err(e @ Error::Decode(_)) => {
                    report.problems.push(format!("{shown}: {e}"));
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(size) = dir.size.filter(|&size| size as usize != entries.len()) {
                report.problems.push(format!(
                    "{shown}: records {size} entries but holds {}",
                    entries.len()
                ));
            }

            let mut names = BTreeSet::new();
            for (_, entry) in entries {
                let name = entry.name();
                let path = format!("{}/{name}", dir.path);
                if !names.insert(name) {
                    report.problems.push(format!("{path}: duplicate name"));
                }

                if entry.is_dir() {
                    report.directories += 1;
                    stack.push(Pending {
                        path,
                        first: entry.first_sector,
                        size: Some(entry.size),
                    });
                    continue;
                }

                report.files += 1;
                if let Some(sectors) = self.claim(entry.first_sector, &path, &mut owners, &mut report)? {
                    let capacity = sectors as u64 * sb.sector_bytes() as u64;
                    if capacity < entry.size as u64 {
                        report.problems.push(format!(
                            "{path}: {} bytes do not fit in {sectors} sectors",
                            entry.size
                        ));
                    }
                }
            }
        }

        let data = sb.data_region();
        report.used_sectors = owners.keys().filter(|&&sector| data.contains(&sector)).count() as u32;
        for sector in sb.data_region() {
            if !self.get_fat_entry(sector)?.is_free() && !owners.contains_key(&sector) {
                report.problems.push(format!("sector {sector} is allocated but unreachable"));
            }
        }

        if report.is_clean() {
            log::info!("image is consistent");
        } else {
            log::warn!("image has {} problems", report.problems.len());
        }
        Ok(report)
    }

    /// 登记链表上的扇区归`path`所有，返回扇区数。
    /// 链表损坏或与其它链表交叉时记录问题并返回`None`。
    fn claim(
        &self,
        first: u32,
        path: &str,
        owners: &mut BTreeMap<u32, String>,
        report: &mut CheckReport,
    ) -> Result<Option<u32>> {
        let mut count = 0;

        for sector in self.chain(first) {
            let sector = match sector {
                Ok(sector) => sector,
                Err(e @ (Error::Corrupted(_) | Error::InvalidSector(_))) => {
                    report.problems.push(format!("{path}: {e}"));
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            match owners.entry(sector) {
                Entry::Occupied(owner) if owner.get() == path => {
                    report.problems.push(format!("{path}: chain loops at sector {sector}"));
                    return Ok(None);
                }
                Entry::Occupied(owner) => {
                    report.problems.push(format!(
                        "sector {sector} is claimed by both {} and {path}",
                        owner.get()
                    ));
                    return Ok(None);
                }
                Entry::Vacant(slot) => {
                    slot.insert(path.to_owned());
                }
            }
            count += 1;
        }

        Ok(Some(count))
    }
}
