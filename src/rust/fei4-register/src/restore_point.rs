// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Restore points: snapshots of the register state for transactional rollback.
//!
//! Restore points are kept in insertion order, which makes the map both the
//! LIFO stack (most recent point last) and the name index.
use crate::register_file::RegisterFile;
use crate::{Error, PixelMatrix, Result};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    /// `(value, not_set)` for each global register, in definition order.
    globals: Vec<(u64, bool)>,
    pixels: Vec<PixelMatrix>,
}

impl Snapshot {
    fn content_hash(&self) -> String {
        let mut buffer = Vec::with_capacity(self.globals.len() * 9 + self.pixels.len() * 26880);
        for (value, not_set) in &self.globals {
            buffer.extend_from_slice(&value.to_le_bytes());
            buffer.push(u8::from(*not_set));
        }
        for pixel in &self.pixels {
            buffer.extend_from_slice(pixel.as_slice());
        }
        format!("{:x}", md5::compute(&buffer))
    }
}

#[derive(Debug, Default)]
pub(crate) struct RestorePointStack {
    points: IndexMap<String, Snapshot>,
}

impl RestorePointStack {
    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }
}

/// Options for [`RegisterFile::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Restore point to use. `None` takes the most recent (or least recent) one.
    pub name: Option<String>,
    /// Keep the restore point instead of removing it.
    pub keep: bool,
    /// Without a name: take the most recent point (`true`) or the oldest (`false`).
    pub last: bool,
    /// Restore the global registers.
    pub global: bool,
    /// Restore the pixel registers.
    pub pixel: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        RestoreOptions {
            name: None,
            keep: false,
            last: true,
            global: true,
            pixel: true,
        }
    }
}

impl RestoreOptions {
    pub fn named(name: impl Into<String>) -> Self {
        RestoreOptions {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn keep(mut self) -> Self {
        self.keep = true;
        self
    }

    pub fn first(mut self) -> Self {
        self.last = false;
        self
    }

    pub fn global_only(mut self) -> Self {
        self.pixel = false;
        self
    }

    pub fn pixel_only(mut self) -> Self {
        self.global = false;
        self
    }
}

impl RegisterFile {
    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            globals: self
                .global_registers
                .iter()
                .map(|r| (r.value, r.not_set))
                .collect(),
            pixels: self
                .pixel_registers
                .iter()
                .map(|r| r.value.clone())
                .collect(),
        }
    }

    pub(crate) fn apply_snapshot(&mut self, snapshot: Snapshot, global: bool, pixel: bool) {
        if global {
            for (register, (value, not_set)) in
                self.global_registers.iter_mut().zip(snapshot.globals)
            {
                register.value = value;
                register.not_set = not_set;
            }
        }
        if pixel {
            for (register, value) in self.pixel_registers.iter_mut().zip(snapshot.pixels) {
                register.value = value;
            }
        }
    }

    /// Snapshot the current register state. Returns the name of the restore point.
    ///
    /// Without a name, the restore point is named by the md5 hash of its content,
    /// with a numeric suffix if a point with the same content is already stored.
    /// An existing point with the same name is replaced and moves to the top.
    pub fn create_restore_point(&mut self, name: Option<&str>) -> String {
        let snapshot = self.snapshot();
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let hash = snapshot.content_hash();
                let mut name = hash.clone();
                let mut suffix = 1;
                while self.restore_points.points.contains_key(&name) {
                    name = format!("{hash}-{suffix}");
                    suffix += 1;
                }
                name
            }
        };
        self.restore_points.points.shift_remove(&name);
        self.restore_points.points.insert(name.clone(), snapshot);
        name
    }

    /// Restore the register state from a restore point.
    pub fn restore(&mut self, options: &RestoreOptions) -> Result<()> {
        let points = &mut self.restore_points.points;
        let snapshot = match (&options.name, options.keep) {
            (Some(name), true) => points.get(name).cloned(),
            (Some(name), false) => points.shift_remove(name),
            (None, true) => {
                if options.last {
                    points.last().map(|(_, s)| s.clone())
                } else {
                    points.first().map(|(_, s)| s.clone())
                }
            }
            (None, false) => {
                if options.last {
                    points.pop().map(|(_, s)| s)
                } else {
                    points.shift_remove_index(0).map(|(_, s)| s)
                }
            }
        };
        let snapshot = snapshot.ok_or_else(|| match &options.name {
            Some(name) => Error::validation(format!("Restore point '{name}' not found")),
            None => Error::validation("No restore point available"),
        })?;
        self.apply_snapshot(snapshot, options.global, options.pixel);
        Ok(())
    }

    /// Remove one restore point, or all of them.
    pub fn clear_restore_points(&mut self, name: Option<&str>) -> Result<()> {
        match name {
            None => {
                self.restore_points.points.clear();
                Ok(())
            }
            Some(name) => self
                .restore_points
                .points
                .shift_remove(name)
                .map(|_| ())
                .ok_or_else(|| Error::validation(format!("Restore point '{name}' not found"))),
        }
    }

    /// Whether the register state differs from a restore point.
    pub fn has_changed(&self, name: Option<&str>, last: bool) -> Result<bool> {
        let points = &self.restore_points.points;
        let snapshot = match name {
            Some(name) => points.get(name),
            None if last => points.last().map(|(_, s)| s),
            None => points.first().map(|(_, s)| s),
        }
        .ok_or_else(|| Error::validation("Restore point not found"))?;
        Ok(*snapshot != self.snapshot())
    }

    /// Names of the stored restore points, oldest first.
    pub fn restore_point_names(&self) -> Vec<&str> {
        self.restore_points.points.keys().map(String::as_str).collect()
    }
}
