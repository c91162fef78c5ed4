//! Binary format for recorded takes (`.fcr`).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::recorder::{RecordedStream, RecordingError};
use crate::schema::{LayoutParams, StreamLayout};

/// Magic bytes identifying a recorded take.
pub const RECORDING_MAGIC: &[u8; 4] = b"FCRS";

/// Current format version.
pub const RECORDING_VERSION: u16 = 1;

/// Which optional fields the recorded frames carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutFlags {
    pub frame_number: bool,
    pub frame_time: bool,
    pub active_flag: bool,
}

impl LayoutFlags {
    pub fn to_u16(self) -> u16 {
        u16::from(self.frame_number) | u16::from(self.frame_time) << 1 | u16::from(self.active_flag) << 2
    }

    pub fn from_u16(v: u16) -> Self {
        Self {
            frame_number: v & 1 != 0,
            frame_time: v & (1 << 1) != 0,
            active_flag: v & (1 << 2) != 0,
        }
    }
}

/// File header for a recorded take.
///
/// ```text
/// Magic "FCRS" (4) | Version u16 | Flags u16 | Blend shapes u32
/// Sentinel u8 | Reserved (3) | Frame size u32 | Frame count u64
/// Name length u16 | Reserved (2) | Name (UTF-8)
/// ```
/// followed by `frame_count * frame_size` bytes of encoded frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHeader {
    pub flags: LayoutFlags,
    pub blend_shape_count: u32,
    pub error_check_byte: u8,
    pub frame_size: u32,
    pub frame_count: u64,
    pub name: String,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

impl RecordingHeader {
    /// Size of the fixed part of the header in bytes.
    pub const SIZE: usize = 32;

    pub fn for_stream(stream: &RecordedStream) -> Self {
        let layout = stream.layout();
        Self {
            flags: LayoutFlags {
                frame_number: layout.has_frame_number(),
                frame_time: layout.has_frame_time(),
                active_flag: layout.has_active_flag(),
            },
            blend_shape_count: layout.blend_shape_count as u32,
            error_check_byte: layout.error_check_byte,
            frame_size: layout.total_frame_size as u32,
            frame_count: stream.frame_count() as u64,
            name: stream.name().to_owned(),
        }
    }

    /// Rebuild the layout the frames were encoded with.
    pub fn layout(&self) -> Result<StreamLayout, RecordingError> {
        let params = LayoutParams {
            blend_shape_count: self.blend_shape_count as usize,
            include_frame_number: self.flags.frame_number,
            include_frame_time: self.flags.frame_time,
            include_active_flag: self.flags.active_flag,
            error_check_byte: self.error_check_byte,
            ..Default::default()
        };
        let layout = StreamLayout::new(&params)?;
        if layout.total_frame_size != self.frame_size as usize {
            return Err(invalid(format!(
                "Header frame size {} does not match layout size {}",
                self.frame_size, layout.total_frame_size
            ))
            .into());
        }
        Ok(layout)
    }

    /// Bytes of frame data following the header.
    pub fn data_len(&self) -> Option<usize> {
        usize::try_from(self.frame_count)
            .ok()?
            .checked_mul(self.frame_size as usize)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let name_len = u16::try_from(self.name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Take name too long"))?;
        w.write_all(RECORDING_MAGIC)?;
        w.write_all(&RECORDING_VERSION.to_le_bytes())?;
        w.write_all(&self.flags.to_u16().to_le_bytes())?;
        w.write_all(&self.blend_shape_count.to_le_bytes())?;
        w.write_all(&[self.error_check_byte, 0, 0, 0])?;
        w.write_all(&self.frame_size.to_le_bytes())?;
        w.write_all(&self.frame_count.to_le_bytes())?;
        w.write_all(&name_len.to_le_bytes())?;
        w.write_all(&[0u8; 2])?;
        w.write_all(self.name.as_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != RECORDING_MAGIC {
            return Err(invalid("Invalid FCRS magic bytes"));
        }

        let mut buf2 = [0u8; 2];
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != RECORDING_VERSION {
            return Err(invalid(format!("Unsupported FCRS version: {}", version)));
        }

        r.read_exact(&mut buf2)?;
        let flags = LayoutFlags::from_u16(u16::from_le_bytes(buf2));

        r.read_exact(&mut buf4)?;
        let blend_shape_count = u32::from_le_bytes(buf4);

        r.read_exact(&mut buf4)?;
        let error_check_byte = buf4[0];

        r.read_exact(&mut buf4)?;
        let frame_size = u32::from_le_bytes(buf4);

        r.read_exact(&mut buf8)?;
        let frame_count = u64::from_le_bytes(buf8);

        r.read_exact(&mut buf4)?;
        let name_len = u16::from_le_bytes([buf4[0], buf4[1]]) as usize;

        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;
        let name = String::from_utf8(name).map_err(|_| invalid("Take name is not UTF-8"))?;

        Ok(Self {
            flags,
            blend_shape_count,
            error_check_byte,
            frame_size,
            frame_count,
            name,
        })
    }

    /// Read just the header of a take on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

impl RecordedStream {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        RecordingHeader::for_stream(self).write_to(w)?;
        w.write_all(self.bytes())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, RecordingError> {
        let header = RecordingHeader::read_from(r)?;
        let layout = header.layout()?;
        let len = header
            .data_len()
            .ok_or_else(|| invalid("Frame data length overflows"))?;

        let mut bytes = Vec::new();
        r.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(RecordingError::InvalidRecordedStream {
                len: bytes.len(),
                frame_size: layout.total_frame_size,
            });
        }
        RecordedStream::new(header.name, layout, bytes)
    }

    /// Save to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordingError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordingError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}
