//! Resumable, block-based file copy.
//!
//! Writes go through `O_DSYNC` so a crash never leaves a block half-flushed
//! to the platter without the data that preceded it also being durable;
//! resuming seeks back one block before the on-disk size to re-write any
//! block that might have been torn.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::progress::ControlEvents;

/// Floor for the copy block size; the destination filesystem's block size
/// is used when it reports something larger.
const MIN_BLOCK_SIZE: u64 = 131_072;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Completed,
    Skipped,
}

#[derive(Debug)]
pub enum CopySignal {
    Abort,
    Interrupt,
}

/// Copies `source` to `target`, resuming from `target`'s current size if it
/// already exists (from a prior interrupted attempt). `on_progress` is
/// called after each block with `(bytes_copied_this_call, total_bytes_done)`.
///
/// Returns `Ok(Skipped)` if the user requested a skip mid-copy, in which
/// case the partial target file has already been removed. Returns `Err`
/// only for `Abort`/`Interrupt`, which leave the partial file in place so a
/// later resume can continue it (interrupt) or the caller decides whether
/// to clean up (abort).
pub fn copy_file(
    source: &Path,
    target: &Path,
    control: &ControlEvents,
    mut on_progress: impl FnMut(u64),
) -> std::io::Result<Result<CopyOutcome, CopySignal>> {
    let mut src = File::open(source)?;
    let total_size = src.metadata()?.len();

    let resuming = target.exists();
    let mut dst = if resuming {
        OpenOptions::new().write(true).custom_flags(libc::O_DSYNC).open(target)?
    } else {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .custom_flags(libc::O_CREAT | libc::O_EXCL | libc::O_DSYNC)
            .mode(0o666)
            .open(target)?;
        preallocate(&file, total_size);
        file
    };

    let block_size = block_size_for(target).max(MIN_BLOCK_SIZE);

    let mut bytes_done = if resuming {
        let existing = dst.metadata()?.len();
        let resume_point = resume_offset(existing, block_size);
        src.seek(SeekFrom::Start(resume_point))?;
        dst.seek(SeekFrom::Start(resume_point))?;
        resume_point
    } else {
        0
    };

    let mut buffer = vec![0u8; block_size as usize];
    loop {
        match control.poll() {
            crate::progress::ControlSignal::Interrupt => return Ok(Err(CopySignal::Interrupt)),
            crate::progress::ControlSignal::Abort => return Ok(Err(CopySignal::Abort)),
            crate::progress::ControlSignal::Skip => {
                drop(dst);
                let _ = std::fs::remove_file(target);
                return Ok(Ok(CopyOutcome::Skipped));
            }
            crate::progress::ControlSignal::Continue => {}
        }
        control.wait_if_suspended();

        let n = read_full(&mut src, &mut buffer)?;
        if n == 0 {
            break;
        }
        write_all(&mut dst, &buffer[..n])?;
        bytes_done += n as u64;
        on_progress(bytes_done);
    }

    dst.flush()?;
    Ok(Ok(CopyOutcome::Completed))
}

/// `read()` can return short reads for reasons unrelated to EOF; loop until
/// the buffer is full or the source is exhausted.
fn read_full(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        match file.read(&mut buffer[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

fn write_all(file: &mut File, mut buffer: &[u8]) -> std::io::Result<()> {
    while !buffer.is_empty() {
        let n = file.write(buffer)?;
        buffer = &buffer[n..];
    }
    Ok(())
}

/// On resume, re-copy starting one block before the existing size so a
/// block that was only partially flushed before interruption gets
/// rewritten rather than trusted.
fn resume_offset(existing_size: u64, block_size: u64) -> u64 {
    if existing_size < block_size {
        return 0;
    }
    (existing_size / block_size - 1) * block_size
}

fn preallocate(file: &File, size: u64) {
    if size == 0 {
        return;
    }
    // Best-effort: EOPNOTSUPP and friends are expected on filesystems that
    // don't support fallocate (e.g. many network filesystems) and are not
    // an error for our purposes.
    let rc = unsafe { libc::fallocate(file.as_raw_fd(), libc::FALLOC_FL_KEEP_SIZE, 0, size as libc::off_t) };
    if rc != 0 {
        log::debug!("block_copy: fallocate unsupported or failed, continuing without it");
    }
}

fn block_size_for(path: &Path) -> u64 {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let c_path = match std::ffi::CString::new(dir.as_os_str().as_encoded_bytes()) {
        Ok(c) => c,
        Err(_) => return MIN_BLOCK_SIZE,
    };
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) == 0 {
            stat.f_bsize as u64
        } else {
            MIN_BLOCK_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn copies_full_content_of_a_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let data: Vec<u8> = (0..1_048_577u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let dst = dir.path().join("dst.bin");
        let control = ControlEvents::new();
        let mut total_reported = 0u64;
        let outcome = copy_file(&src, &dst, &control, |n| total_reported = n).unwrap().unwrap();

        assert_eq!(outcome, CopyOutcome::Completed);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
        assert_eq!(total_reported, data.len() as u64);
    }

    #[test]
    fn resumes_from_partial_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let data: Vec<u8> = (0..10_000_000u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let dst = dir.path().join("dst.bin");
        // Simulate a prior attempt that got 2MB in.
        std::fs::write(&dst, &data[..2_000_000]).unwrap();

        let control = ControlEvents::new();
        let outcome = copy_file(&src, &dst, &control, |_| {}).unwrap().unwrap();
        assert_eq!(outcome, CopyOutcome::Completed);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn skip_mid_copy_removes_partial_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, vec![1u8; 5_000_000]).unwrap();
        let dst = dir.path().join("dst.bin");

        let control = Arc::new(crate::progress::ControlEvents::default());
        control.request_skip();
        let outcome = copy_file(&src, &dst, &control, |_| {}).unwrap().unwrap();
        assert_eq!(outcome, CopyOutcome::Skipped);
        assert!(!dst.exists());
    }

    #[test]
    fn resume_offset_steps_back_one_block() {
        assert_eq!(resume_offset(300_000, 131_072), 131_072);
        assert_eq!(resume_offset(50_000, 131_072), 0);
    }
}
