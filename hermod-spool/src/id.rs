use std::{fs, io, path::Path};

use parking_lot::Mutex;

/// Largest record id before the counter wraps back to 1.
pub const MAX_RECORD_ID: u32 = 0x7FFF_FFFF;

/// Hands out record ids, which double as file names.
#[derive(Debug)]
pub struct IdAllocator {
    last: Mutex<u32>,
}

impl IdAllocator {
    #[must_use]
    pub const fn starting_after(last: u32) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Continue after the largest numeric file name in `dir`.
    ///
    /// # Errors
    ///
    /// If `dir` cannot be listed.
    pub fn recover(dir: &Path) -> io::Result<Self> {
        let mut last = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
                .filter(|&id| id <= MAX_RECORD_ID)
            {
                last = last.max(id);
            }
        }
        Ok(Self::starting_after(last))
    }

    pub fn next_id(&self) -> u32 {
        let mut last = self.last.lock();
        *last = if *last >= MAX_RECORD_ID { 1 } else { *last + 1 };
        *last
    }
}
