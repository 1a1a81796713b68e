use chrono::{DateTime, Utc};
use rustix::fs::{FileType, Mode};
use std::fmt;
use tracing::error;
use crate::fs::FileInfo;
use crate::storage::ObjectMeta;

/// 所有人可读写执行，后端没有 ACL 可查
fn full_permission() -> u32 {
    (Mode::RWXU | Mode::RWXG | Mode::RWXO).bits() as u32
}

pub fn permission_bits(is_dir: bool) -> u32 {
    let file_type = if is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    file_type.as_raw_mode() as u32 | full_permission()
}

/// 把 `st_mode` 渲染成 `drwxr-xr-x` 形式
pub fn mode_string(mode: u32, is_dir: bool) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// 单个对象（或由前缀推断出的目录）的文件信息
///
/// 目录没有对应的对象，只有名字和目录标志有意义。
/// owner/group 都是当前登录的用户。
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    name: String,
    is_dir: bool,
    user: String,
    object: Option<ObjectMeta>,
}

impl ObjectInfo {
    pub fn file(name: impl Into<String>, user: impl Into<String>, object: ObjectMeta) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            user: user.into(),
            object: Some(object),
        }
    }

    pub fn directory(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            user: user.into(),
            object: None,
        }
    }

    pub fn object(&self) -> Option<&ObjectMeta> {
        self.object.as_ref()
    }
}

impl FileInfo for ObjectInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.object.as_ref().map_or(0, |object| object.size)
    }

    fn mode(&self) -> u32 {
        permission_bits(self.is_dir)
    }

    fn mod_time(&self) -> DateTime<Utc> {
        let Some(object) = &self.object else {
            return Utc::now();
        };
        match DateTime::parse_from_rfc3339(&object.updated) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(e) => {
                error!("Could not parse time for string {:?}: {}", object.updated, e);
                Utc::now()
            }
        }
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn owner(&self) -> &str {
        &self.user
    }

    fn group(&self) -> &str {
        &self.user
    }
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 1 {:>12} {:>12} {:>14} {} {}",
            mode_string(self.mode(), self.is_dir),
            self.owner(),
            self.group(),
            self.size(),
            self.mod_time().format("%b %d %H:%M"),
            self.name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S_IFMT: u32 = 0o170000;
    const S_IFDIR: u32 = 0o040000;
    const S_IFREG: u32 = 0o100000;

    fn meta(size: u64, updated: &str) -> ObjectMeta {
        ObjectMeta {
            name: "photos/a.jpg".to_string(),
            bucket: "media".to_string(),
            size,
            updated: updated.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_info() {
        let info = ObjectInfo::file("a.jpg", "alice", meta(2048, "2020-05-01T10:20:30.000Z"));
        assert_eq!(info.name(), "a.jpg");
        assert_eq!(info.size(), 2048);
        assert!(!info.is_dir());
        assert_eq!(info.owner(), "alice");
        assert_eq!(info.group(), "alice");
        assert_eq!(info.mode() & S_IFMT, S_IFREG);
        assert_eq!(info.mode() & 0o777, 0o777);
        assert_eq!(info.mod_time().to_rfc3339(), "2020-05-01T10:20:30+00:00");
    }

    #[test]
    fn test_directory_info() {
        let info = ObjectInfo::directory("2020", "bob");
        assert!(info.is_dir());
        assert_eq!(info.size(), 0);
        assert_eq!(info.mode() & S_IFMT, S_IFDIR);
        assert_eq!(info.mode() & 0o777, 0o777);
        assert!(info.object().is_none());
    }

    #[test]
    fn test_unparsable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let info = ObjectInfo::file("x", "alice", meta(1, "yesterday-ish"));
        let modified = info.mod_time();
        assert!(modified >= before);
        assert!(modified <= Utc::now());
    }

    #[test]
    fn test_offset_timestamp_normalized_to_utc() {
        let info = ObjectInfo::file("x", "alice", meta(1, "2021-01-01T08:00:00+08:00"));
        assert_eq!(info.mod_time().to_rfc3339(), "2021-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_listing_line() {
        let info = ObjectInfo::file("a.jpg", "alice", meta(42, "2020-05-01T10:20:30Z"));
        let line = info.to_string();
        assert!(line.starts_with("-rwxrwxrwx 1"));
        assert!(line.contains("May 01 10:20"));
        assert!(line.ends_with(" a.jpg"));

        let dir = ObjectInfo::directory("2020", "alice").to_string();
        assert!(dir.starts_with("drwxrwxrwx 1"));
    }

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(0o754, false), "-rwxr-xr--");
        assert_eq!(mode_string(0o040700, true), "drwx------");
    }
}
