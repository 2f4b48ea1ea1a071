//! Built-in property codes.
//!
//! Well-known properties are keyed by a four character code instead of a
//! string name, which keeps lookups cheap and avoids allocating names. The
//! table below maps every code to its textual name so that argument strings
//! and dumps can use names.

use super::value::PropertyType;

/// Build a four character code from its ASCII bytes.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    ((code[0] as u32) << 24) | ((code[1] as u32) << 16) | ((code[2] as u32) << 8) | (code[3] as u32)
}

/// Render a four character code as text.
pub fn fourcc_to_string(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Stream identifier.
pub const ID: u32 = fourcc(b"PIDI");
/// Stream type, see [`stream_type`].
pub const STREAM_TYPE: u32 = fourcc(b"PMST");
/// Codec identifier.
pub const CODEC_ID: u32 = fourcc(b"POTI");
/// Timescale of timestamps on the pid.
pub const TIMESCALE: u32 = fourcc(b"TIMS");
/// Stream is not framed: packets are not complete access units.
pub const UNFRAMED: u32 = fourcc(b"PFRM");
/// Total duration of the stream.
pub const DURATION: u32 = fourcc(b"PDUR");
/// Number of frames in the stream.
pub const NB_FRAMES: u32 = fourcc(b"NFRM");
/// Decoder configuration blob.
pub const DECODER_CONFIG: u32 = fourcc(b"DCFG");
/// Audio sample rate.
pub const SAMPLE_RATE: u32 = fourcc(b"AUSR");
/// Number of audio channels.
pub const NUM_CHANNELS: u32 = fourcc(b"CHNB");
/// Visual width.
pub const WIDTH: u32 = fourcc(b"WIDT");
/// Visual height.
pub const HEIGHT: u32 = fourcc(b"HEIG");
/// Pixel format.
pub const PIXFMT: u32 = fourcc(b"PFMT");
/// Video frame rate.
pub const FPS: u32 = fourcc(b"VFPF");
/// Bitrate in bits per second.
pub const BITRATE: u32 = fourcc(b"RATE");
/// Language code.
pub const LANGUAGE: u32 = fourcc(b"LANG");
/// Source URL.
pub const URL: u32 = fourcc(b"FURL");
/// Path of the source on the file system.
pub const FILE_PATH: u32 = fourcc(b"FSRC");
/// MIME type of the source.
pub const MIME: u32 = fourcc(b"MIME");
/// File extension of the source.
pub const FILE_EXT: u32 = fourcc(b"FEXT");
/// Service identifier.
pub const SERVICE_ID: u32 = fourcc(b"PSID");
/// Maximum NAL unit size, usually set as info.
pub const MAX_NALU_SIZE: u32 = fourcc(b"NALS");
/// File index when streams are made of files.
pub const FILE_NUMBER: u32 = fourcc(b"FNUM");

/// Values for [`STREAM_TYPE`].
pub mod stream_type {
    /// Unknown stream.
    pub const UNKNOWN: u32 = 0;
    /// Raw file data.
    pub const FILE: u32 = 1;
    /// Scene description.
    pub const SCENE: u32 = 3;
    /// Video.
    pub const VISUAL: u32 = 4;
    /// Audio.
    pub const AUDIO: u32 = 5;
    /// Text and subtitles.
    pub const TEXT: u32 = 13;
}

/// Description of a built-in property.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinProperty {
    /// Four character code.
    pub code: u32,
    /// Textual name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Value type.
    pub ty: PropertyType,
}

const fn prop(code: u32, name: &'static str, description: &'static str, ty: PropertyType) -> BuiltinProperty {
    BuiltinProperty { code, name, description, ty }
}

/// All built-in properties.
pub static BUILTIN_PROPERTIES: &[BuiltinProperty] = &[
    prop(ID, "ID", "Stream ID of the pid", PropertyType::Uint),
    prop(STREAM_TYPE, "StreamType", "Media stream type", PropertyType::Uint),
    prop(CODEC_ID, "CodecID", "Codec identifier", PropertyType::Uint),
    prop(TIMESCALE, "Timescale", "Timescale of the pid (a timestamp of N is N/timescale seconds)", PropertyType::Uint),
    prop(UNFRAMED, "Unframed", "Media data is not framed (packets are not complete frames)", PropertyType::Bool),
    prop(DURATION, "Duration", "Duration of the pid", PropertyType::Fraction64),
    prop(NB_FRAMES, "NumFrames", "Number of frames in the stream", PropertyType::Uint),
    prop(DECODER_CONFIG, "DecoderConfig", "Decoder configuration data", PropertyType::Data),
    prop(SAMPLE_RATE, "SampleRate", "Audio sample rate", PropertyType::Uint),
    prop(NUM_CHANNELS, "NumChannels", "Number of audio channels", PropertyType::Uint),
    prop(WIDTH, "Width", "Visual width", PropertyType::Uint),
    prop(HEIGHT, "Height", "Visual height", PropertyType::Uint),
    prop(PIXFMT, "PixelFormat", "Pixel format", PropertyType::Uint),
    prop(FPS, "FPS", "Video frame rate", PropertyType::Fraction),
    prop(BITRATE, "Bitrate", "Bitrate in bps", PropertyType::Uint),
    prop(LANGUAGE, "Language", "Language code", PropertyType::String),
    prop(URL, "URL", "URL of the source", PropertyType::String),
    prop(FILE_PATH, "SourcePath", "Path of the source on the file system", PropertyType::String),
    prop(MIME, "MIMEType", "MIME type of the source", PropertyType::String),
    prop(FILE_EXT, "Extension", "File extension of the source", PropertyType::String),
    prop(SERVICE_ID, "ServiceID", "ID of the parent service", PropertyType::Uint),
    prop(MAX_NALU_SIZE, "NALUMaxSize", "Maximum NAL unit size", PropertyType::Uint),
    prop(FILE_NUMBER, "FileNumber", "Index of the file when dumping streams made of files", PropertyType::Uint),
];

/// Look up a built-in property by code.
pub fn by_code(code: u32) -> Option<&'static BuiltinProperty> {
    BUILTIN_PROPERTIES.iter().find(|p| p.code == code)
}

/// Look up a built-in property by name (case insensitive).
pub fn by_name(name: &str) -> Option<&'static BuiltinProperty> {
    BUILTIN_PROPERTIES.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Name of a built-in property code.
pub fn name_of(code: u32) -> Option<&'static str> {
    by_code(code).map(|p| p.name)
}
