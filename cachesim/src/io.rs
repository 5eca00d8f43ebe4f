use std::fs::File;

/// The raw bytes of a trace file, however they were loaded.
pub enum TraceBytes {
    #[cfg(unix)]
    Mapped(memmap2::Mmap),
    Buffered(Vec<u8>),
}

impl AsRef<[u8]> for TraceBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            #[cfg(unix)]
            TraceBytes::Mapped(map) => &map[..],
            TraceBytes::Buffered(bytes) => &bytes[..],
        }
    }
}

/// Loads a trace file for replay.
///
/// On unix the file is memory mapped and the OS is told the access pattern
/// is sequential; for the multi-hundred-megabyte traces this gets pointed
/// at, skipping the copy is a measurable win. Elsewhere the file is read
/// into a buffer.
#[cfg(unix)]
pub fn read_trace(file: File) -> Result<TraceBytes, String> {
    use memmap2::{Advice, Mmap};
    unsafe {
        let map = Mmap::map(&file).map_err(|e| format!("couldn't memory map the file: {e}"))?;
        map.advise(Advice::Sequential)
            .map_err(|e| format!("failed to provide access advice to the OS: {e}"))?;
        Ok(TraceBytes::Mapped(map))
    }
}

#[cfg(not(unix))]
pub fn read_trace(mut file: File) -> Result<TraceBytes, String> {
    use std::io::Read;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| format!("couldn't read the file: {e}"))?;
    Ok(TraceBytes::Buffered(bytes))
}
