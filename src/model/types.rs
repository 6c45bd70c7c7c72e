// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{read_cstr, write_cstr, Decode, DecodeError, Encode, EncodeError},
    value::ValueType,
};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

fn write_vtype<W: Write>(writer: &mut W, v: ValueType) -> Result<(), EncodeError> {
    writer.write_u32::<LE>(u32::from(v as u8))?;
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn read_vtype<R: Read>(reader: &mut R) -> Result<ValueType, DecodeError> {
    let raw = reader.read_u32::<LE>()?;
    u8::try_from(raw)
        .ok()
        .and_then(|t| ValueType::try_from(t).ok())
        .ok_or(DecodeError::InvalidTag(("ValueType", raw as u8)))
}

/// How vertex ids of a type are produced
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum VidKind {
    /// Caller supplies numeric ids
    #[default]
    Numeric,

    /// Ids are text surrogates from the dictionary
    Text,
}

/// A vertex type
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vertex {
    /// Stable role id, assigned as max + 1 at creation
    pub roleid: u32,

    /// Type name
    pub name: String,

    /// Vertex id kind
    pub vid: VidKind,

    /// Whether a property is flagged as the stamp
    pub stamped: bool,

    /// Number of properties
    pub num: u16,

    /// Control-block size of an assembled row
    pub ctrl: u32,

    /// Assembled row size: `8 * num + ctrl`
    pub size: u32,
}

impl Encode for Vertex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LE>(self.roleid)?;
        writer.write_u8(match self.vid {
            VidKind::Numeric => 0,
            VidKind::Text => 1,
        })?;
        writer.write_u8(u8::from(self.stamped))?;
        writer.write_u16::<LE>(self.num)?;
        writer.write_u32::<LE>(self.ctrl)?;
        writer.write_u32::<LE>(self.size)?;
        write_cstr(writer, &self.name)?;
        Ok(())
    }
}

impl Decode for Vertex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let roleid = reader.read_u32::<LE>()?;
        let vid = match reader.read_u8()? {
            0 => VidKind::Numeric,
            1 => VidKind::Text,
            tag => return Err(DecodeError::InvalidTag(("VidKind", tag))),
        };
        let stamped = reader.read_u8()? != 0;
        let num = reader.read_u16::<LE>()?;
        let ctrl = reader.read_u32::<LE>()?;
        let size = reader.read_u32::<LE>()?;
        let name = read_cstr(reader)?;

        Ok(Self {
            roleid,
            name,
            vid,
            stamped,
            num,
            ctrl,
            size,
        })
    }
}

/// A property of a vertex type
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Property {
    /// Stable property id
    pub propid: u64,

    /// Owning vertex type
    pub roleid: u32,

    /// Declared position in the CREATE statement
    pub pos: u32,

    /// Value type
    pub value: ValueType,

    /// Primary key flag; at most one per role
    pub pk: bool,

    /// Stamp flag
    pub stamp: bool,

    /// Auto-increment flag
    pub inc: bool,

    /// Slot index in the assembled row: pk first, stamp second,
    /// the rest in declared order
    pub off: u32,

    /// Property name
    pub name: String,
}

impl Encode for Property {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LE>(self.propid)?;
        writer.write_u32::<LE>(self.roleid)?;
        writer.write_u32::<LE>(self.pos)?;
        write_vtype(writer, self.value)?;
        writer.write_u8(u8::from(self.pk))?;
        writer.write_u8(u8::from(self.stamp))?;
        writer.write_u8(u8::from(self.inc))?;
        writer.write_u32::<LE>(self.off)?;
        write_cstr(writer, &self.name)?;
        Ok(())
    }
}

impl Decode for Property {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            propid: reader.read_u64::<LE>()?,
            roleid: reader.read_u32::<LE>()?,
            pos: reader.read_u32::<LE>()?,
            value: read_vtype(reader)?,
            pk: reader.read_u8()? != 0,
            stamp: reader.read_u8()? != 0,
            inc: reader.read_u8()? != 0,
            off: reader.read_u32::<LE>()?,
            name: read_cstr(reader)?,
        })
    }
}

/// An edge type
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Edge {
    /// Stable edge id
    pub edgeid: u64,

    /// Edge type name
    pub name: String,

    /// Role id of the origin vertex type
    pub origin: u32,

    /// Role id of the destination vertex type
    pub destin: u32,

    /// Type of the label field
    pub label: ValueType,

    /// Type of the first weight
    pub weight: ValueType,

    /// Type of the second weight
    pub weight2: ValueType,

    /// Whether edge records carry a meaningful stamp
    pub stamped: bool,

    /// Number of declared attributes
    pub num: u16,

    /// Per-record control area size
    pub ctrl: u32,

    /// Record size
    pub size: u32,
}

impl Encode for Edge {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LE>(self.edgeid)?;
        writer.write_u32::<LE>(self.origin)?;
        writer.write_u32::<LE>(self.destin)?;
        write_vtype(writer, self.label)?;
        write_vtype(writer, self.weight)?;
        write_vtype(writer, self.weight2)?;
        writer.write_u8(u8::from(self.stamped))?;
        writer.write_u16::<LE>(self.num)?;
        writer.write_u32::<LE>(self.ctrl)?;
        writer.write_u32::<LE>(self.size)?;
        write_cstr(writer, &self.name)?;
        Ok(())
    }
}

impl Decode for Edge {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            edgeid: reader.read_u64::<LE>()?,
            origin: reader.read_u32::<LE>()?,
            destin: reader.read_u32::<LE>()?,
            label: read_vtype(reader)?,
            weight: read_vtype(reader)?,
            weight2: read_vtype(reader)?,
            stamped: reader.read_u8()? != 0,
            num: reader.read_u16::<LE>()?,
            ctrl: reader.read_u32::<LE>()?,
            size: reader.read_u32::<LE>()?,
            name: read_cstr(reader)?,
        })
    }
}

/// A declared property of an edge type
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pedge {
    /// Stable property id
    pub propid: u64,

    /// Owning edge type
    pub edgeid: u64,

    /// Declared position in the CREATE statement; never rewritten
    pub pos: u32,

    /// Value type
    pub value: ValueType,

    /// Fixed slot index: origin 0, destin 1, stamp 2, the rest in
    /// declared order after
    pub off: u32,

    /// This property is the origin reference
    pub origin: bool,

    /// This property is the destination reference
    pub destin: bool,

    /// This property is the stamp
    pub stamp: bool,

    /// Property name
    pub name: String,
}

impl Encode for Pedge {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LE>(self.propid)?;
        writer.write_u64::<LE>(self.edgeid)?;
        writer.write_u32::<LE>(self.pos)?;
        write_vtype(writer, self.value)?;
        writer.write_u32::<LE>(self.off)?;
        writer.write_u8(u8::from(self.origin))?;
        writer.write_u8(u8::from(self.destin))?;
        writer.write_u8(u8::from(self.stamp))?;
        write_cstr(writer, &self.name)?;
        Ok(())
    }
}

impl Decode for Pedge {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            propid: reader.read_u64::<LE>()?,
            edgeid: reader.read_u64::<LE>()?,
            pos: reader.read_u32::<LE>()?,
            value: read_vtype(reader)?,
            off: reader.read_u32::<LE>()?,
            origin: reader.read_u8()? != 0,
            destin: reader.read_u8()? != 0,
            stamp: reader.read_u8()? != 0,
            name: read_cstr(reader)?,
        })
    }
}
