//! mocopi-style binary packet codec
//!
//! Every field is a tag-length-value record:
//!
//! ```text
//! ┌──────────────────┬──────────────┬──────────────────────┐
//! │ Length (4 bytes) │ Tag (4 ASCII)│ Payload (Length)     │
//! │ Little-endian u32│ e.g. "fram"  │ scalar or sub-fields │
//! └──────────────────┴──────────────┴──────────────────────┘
//! ```
//!
//! A packet is a run of top-level fields: an optional `head` and `sndf`
//! followed by either a skeleton definition or a frame:
//!
//! ```text
//! skdf ─ bons ─ bndt* ─ bnid u16 | pbid u16 (0xFFFF = root) | tran 7×f32
//! fram ─ fnum u32 | time u32 (ms) | uttm f64 | btrs ─ btdt* ─ bnid u16 | tran 7×f32
//! ```
//!
//! `tran` is rotation x, y, z, w followed by position x, y, z, all in the
//! sender's native axis convention. Unknown tags are skipped.

use glam::{Quat, Vec3};
use std::collections::BTreeMap;

use crate::error::PacketError;
use crate::skeleton::{BoneDefinition, BoneId, BonePose, FrameEvent, SkeletonDefinition};

/// Size of a field header (length + tag)
pub const HEADER_SIZE: usize = 8;

/// Size of a `tran` payload: 7 × f32
pub const TRAN_SIZE: usize = 28;

/// Parent id marking the root bone on the wire
pub const ROOT_PARENT: u16 = u16::MAX;

const FORMAT_TAG: &str = "sony motion format";
const FORMAT_VERSION: u8 = 1;

/// A decoded packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Definition(SkeletonDefinition),
    Frame(FrameEvent),
}

/// One tag-length-value record borrowed from the input buffer
#[derive(Debug, Clone, Copy)]
struct Field<'a> {
    tag: [u8; 4],
    body: &'a [u8],
}

impl Field<'_> {
    fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }

    fn expect_len(&self, expected: usize) -> Result<(), PacketError> {
        if self.body.len() != expected {
            return Err(PacketError::BadLength {
                tag: self.tag_str(),
                expected,
                actual: self.body.len(),
            });
        }
        Ok(())
    }

    fn u16(&self) -> Result<u16, PacketError> {
        self.expect_len(2)?;
        Ok(u16::from_le_bytes([self.body[0], self.body[1]]))
    }

    fn u32(&self) -> Result<u32, PacketError> {
        self.expect_len(4)?;
        Ok(u32::from_le_bytes([
            self.body[0],
            self.body[1],
            self.body[2],
            self.body[3],
        ]))
    }

    fn f64(&self) -> Result<f64, PacketError> {
        self.expect_len(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.body);
        Ok(f64::from_le_bytes(bytes))
    }

    /// Native-convention pose from a `tran` payload
    fn tran(&self) -> Result<BonePose, PacketError> {
        self.expect_len(TRAN_SIZE)?;
        let mut v = [0f32; 7];
        for (i, chunk) in self.body.chunks_exact(4).enumerate() {
            v[i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(BonePose {
            rotation: Quat::from_xyzw(v[0], v[1], v[2], v[3]),
            position: Vec3::new(v[4], v[5], v[6]),
        })
    }
}

/// Split a buffer into its sequence of fields
fn fields(buf: &[u8]) -> Result<Vec<Field<'_>>, PacketError> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        if buf.len() - pos < HEADER_SIZE {
            return Err(PacketError::TruncatedHeader { offset: pos });
        }
        let len = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        let tag = [buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]];
        pos += HEADER_SIZE;

        let available = buf.len() - pos;
        if len > available {
            return Err(PacketError::TruncatedField {
                tag: String::from_utf8_lossy(&tag).into_owned(),
                declared: len,
                available,
            });
        }

        out.push(Field {
            tag,
            body: &buf[pos..pos + len],
        });
        pos += len;
    }

    Ok(out)
}

fn find<'a>(fields: &[Field<'a>], tag: &'static str) -> Option<Field<'a>> {
    fields.iter().find(|f| &f.tag == tag.as_bytes()).copied()
}

fn require<'a>(fields: &[Field<'a>], tag: &'static str) -> Result<Field<'a>, PacketError> {
    find(fields, tag).ok_or(PacketError::MissingField(tag))
}

/// Decode a single datagram
pub fn decode(buf: &[u8]) -> Result<Packet, PacketError> {
    let top = fields(buf)?;

    if let Some(skdf) = find(&top, "skdf") {
        return decode_definition(skdf.body).map(Packet::Definition);
    }
    if let Some(fram) = find(&top, "fram") {
        return decode_frame(fram.body).map(Packet::Frame);
    }

    Err(PacketError::NoPayload)
}

fn decode_definition(body: &[u8]) -> Result<SkeletonDefinition, PacketError> {
    let inner = fields(body)?;
    let bons = require(&inner, "bons")?;

    let mut bones = Vec::new();
    for bndt in fields(bons.body)?.into_iter().filter(|f| &f.tag == b"bndt") {
        let items = fields(bndt.body)?;
        let id = require(&items, "bnid")?.u16()?;
        let parent = require(&items, "pbid")?.u16()?;
        let rest = require(&items, "tran")?.tran()?;

        bones.push(BoneDefinition {
            id: BoneId(id),
            parent: (parent != ROOT_PARENT).then_some(BoneId(parent)),
            rest,
        });
    }

    Ok(SkeletonDefinition::new(bones)?)
}

fn decode_frame(body: &[u8]) -> Result<FrameEvent, PacketError> {
    let inner = fields(body)?;
    let frame_id = require(&inner, "fnum")?.u32()?;
    let time_ms = require(&inner, "time")?.u32()?;
    let unix_time = require(&inner, "uttm")?.f64()?;
    let btrs = require(&inner, "btrs")?;

    let mut poses = BTreeMap::new();
    for btdt in fields(btrs.body)?.into_iter().filter(|f| &f.tag == b"btdt") {
        let items = fields(btdt.body)?;
        let id = require(&items, "bnid")?.u16()?;
        let pose = require(&items, "tran")?.tran()?;
        poses.insert(BoneId(id), pose);
    }

    Ok(FrameEvent {
        frame_id,
        timestamp: time_ms as f32 / 1000.0,
        unix_time,
        poses,
    })
}

// --- Encoding ---

fn put_field(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(body);
}

fn tran_bytes(pose: &BonePose) -> [u8; TRAN_SIZE] {
    let values = [
        pose.rotation.x,
        pose.rotation.y,
        pose.rotation.z,
        pose.rotation.w,
        pose.position.x,
        pose.position.y,
        pose.position.z,
    ];
    let mut out = [0u8; TRAN_SIZE];
    for (chunk, v) in out.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    out
}

fn header() -> Vec<u8> {
    let mut head = Vec::new();
    put_field(&mut head, b"ftyp", FORMAT_TAG.as_bytes());
    put_field(&mut head, b"vrsn", &[FORMAT_VERSION]);

    let mut out = Vec::new();
    put_field(&mut out, b"head", &head);
    out
}

/// Encode a skeleton definition packet
pub fn encode_definition(definition: &SkeletonDefinition) -> Vec<u8> {
    let mut bons = Vec::new();
    for bone in definition.bones() {
        let mut bndt = Vec::new();
        put_field(&mut bndt, b"bnid", &bone.id.0.to_le_bytes());
        let parent = bone.parent.map(|p| p.0).unwrap_or(ROOT_PARENT);
        put_field(&mut bndt, b"pbid", &parent.to_le_bytes());
        put_field(&mut bndt, b"tran", &tran_bytes(&bone.rest));
        put_field(&mut bons, b"bndt", &bndt);
    }

    let mut skdf = Vec::new();
    put_field(&mut skdf, b"bons", &bons);

    let mut out = header();
    put_field(&mut out, b"skdf", &skdf);
    out
}

/// Encode a frame packet. The timestamp is truncated to whole milliseconds.
pub fn encode_frame(frame: &FrameEvent) -> Vec<u8> {
    let mut btrs = Vec::new();
    for (id, pose) in &frame.poses {
        let mut btdt = Vec::new();
        put_field(&mut btdt, b"bnid", &id.0.to_le_bytes());
        put_field(&mut btdt, b"tran", &tran_bytes(pose));
        put_field(&mut btrs, b"btdt", &btdt);
    }

    let time_ms = (frame.timestamp.max(0.0) * 1000.0) as u32;

    let mut fram = Vec::new();
    put_field(&mut fram, b"fnum", &frame.frame_id.to_le_bytes());
    put_field(&mut fram, b"time", &time_ms.to_le_bytes());
    put_field(&mut fram, b"uttm", &frame.unix_time.to_le_bytes());
    put_field(&mut fram, b"btrs", &btrs);

    let mut out = header();
    put_field(&mut out, b"fram", &fram);
    out
}
