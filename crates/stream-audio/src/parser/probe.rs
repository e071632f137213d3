//! Container detection on the first bytes of a stream.

use super::adts::AdtsHeader;
use super::format::FileType;
use super::input::Input;
use super::mpeg::FrameHeader;
use super::{ParserError, ParserOptions, ParserResult};

/// Signatures of containers we recognise but cannot demux.
const FOREIGN_SIGNATURES: [(&[u8], &str); 5] = [
    (b"OggS", "ogg"),
    (b"fLaC", "flac"),
    (b"FORM", "aiff"),
    (b"#EXTM3U", "m3u playlist"),
    (b"<", "markup document"),
];

#[derive(Debug, Default)]
pub(crate) struct Probe {
    /// Bytes discarded while searching for a sync word.
    scanned: usize,
}

impl Probe {
    /// Returns the detected container once enough bytes are buffered, `None` to wait for more.
    pub(crate) fn detect(
        &mut self,
        input: &mut Input,
        options: &ParserOptions,
        finishing: bool,
    ) -> ParserResult<Option<FileType>> {
        loop {
            let buf = input.as_slice();
            if buf.len() < 12 && !finishing {
                return Ok(None);
            }
            if buf.len() < 4 {
                return Err(ParserError::UnsupportedFileType(
                    "stream ended before a container was recognised".into(),
                ));
            }

            if buf.starts_with(b"ID3") {
                if buf.len() < 10 {
                    return if finishing {
                        Err(ParserError::UnsupportedFileType("truncated id3 tag".into()))
                    } else {
                        Ok(None)
                    };
                }
                let size = buf[6..10]
                    .iter()
                    .fold(0u64, |acc, b| (acc << 7) | u64::from(b & 0x7F));
                let footer = if buf[5] & 0x10 != 0 { 10 } else { 0 };
                input.skip(10 + size + footer);
                continue;
            }

            if buf.starts_with(b"RIFF") {
                if buf.get(8..12) == Some(&b"WAVE"[..]) {
                    return select(FileType::Wave, options).map(Some);
                }
                return Err(ParserError::UnsupportedFileType(
                    "riff container without WAVE form".into(),
                ));
            }
            if buf.get(4..8) == Some(&b"ftyp"[..]) {
                return Err(ParserError::UnsupportedFileType("mp4".into()));
            }
            if let Some((_, name)) = FOREIGN_SIGNATURES
                .iter()
                .find(|(magic, _)| buf.starts_with(magic))
            {
                return Err(ParserError::UnsupportedFileType((*name).into()));
            }

            let mut found = None;
            let mut consumed = buf.len().saturating_sub(1);
            for i in 0..buf.len().saturating_sub(1) {
                if buf[i] != 0xFF || buf[i + 1] & 0xE0 != 0xE0 {
                    continue;
                }
                if buf.len() - i < 7 {
                    consumed = i;
                    break;
                }
                if AdtsHeader::parse(&buf[i..]).is_some() {
                    found = Some((i, FileType::Adts));
                    break;
                }
                if FrameHeader::parse(&buf[i..]).is_some() {
                    found = Some((i, FileType::Mp3));
                    break;
                }
            }

            if let Some((at, file_type)) = found {
                input.advance(at);
                return select(file_type, options).map(Some);
            }

            input.advance(consumed);
            self.scanned += consumed;
            if self.scanned > options.max_probe_bytes {
                return Err(ParserError::UnsupportedFileType(format!(
                    "no audio sync word within {} bytes",
                    options.max_probe_bytes
                )));
            }
            if finishing {
                return Err(ParserError::UnsupportedFileType(
                    "no audio sync word before end of stream".into(),
                ));
            }
            return Ok(None);
        }
    }
}

fn select(file_type: FileType, options: &ParserOptions) -> ParserResult<FileType> {
    if options.file_types.contains(&file_type) {
        Ok(file_type)
    } else {
        Err(ParserError::UnsupportedFileType(format!(
            "{file_type} streams are disabled"
        )))
    }
}
