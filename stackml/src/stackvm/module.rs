//! Module container: header, buffer descriptors and named sections.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic        4 bytes  "SMOD"
//! version      u32
//! module_type  8 bytes  (e.g. "stackvm\0")
//! pool sizes   4 x u64  (input, output, rdata, data)
//! descriptors  u32 length + bincode (inputs, outputs)
//! sections     u32 count, then per section: u8 name length, name, u32 length, body
//! ```

use super::binary::{self, BinaryReader};
use crate::error::{Error, Result};
use crate::memory::{MemoryLocation, MemoryView};

pub type ModuleType = [u8; 8];

pub const STACKVM_MODULE_TYPE: ModuleType = *b"stackvm\0";
pub const MODULE_MAGIC: [u8; 4] = *b"SMOD";
pub const MODULE_VERSION: u32 = 1;

pub const TEXT_SECTION: &str = ".text";
pub const RDATA_SECTION: &str = ".rdata";

/// Largest pool a module may request.
pub const MAX_POOL_SIZE: usize = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub module_type: ModuleType,
    pub pool_sizes: [usize; MemoryLocation::COUNT],
    pub inputs: Vec<MemoryView>,
    pub outputs: Vec<MemoryView>,
    pub sections: Vec<Section>,
}

impl Module {
    pub fn new(
        module_type: ModuleType,
        pool_sizes: [usize; MemoryLocation::COUNT],
        inputs: Vec<MemoryView>,
        outputs: Vec<MemoryView>,
    ) -> Self {
        Self {
            module_type,
            pool_sizes,
            inputs,
            outputs,
            sections: Vec::new(),
        }
    }

    /// Add or replace a section.
    pub fn set_section(&mut self, name: &str, body: Vec<u8>) {
        match self.sections.iter_mut().find(|s| s.name == name) {
            Some(section) => section.body = body,
            None => self.sections.push(Section {
                name: name.to_string(),
                body,
            }),
        }
    }

    pub fn section(&self, name: &str) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.body.as_slice())
    }

    /// Instruction stream; empty when the section is missing.
    pub fn text(&self) -> &[u8] {
        self.section(TEXT_SECTION).unwrap_or_default()
    }

    /// Initial contents of the rdata pool; empty when the section is missing.
    pub fn rdata(&self) -> &[u8] {
        self.section(RDATA_SECTION).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MODULE_MAGIC);
        binary::write_u32_le(&mut buf, MODULE_VERSION);
        buf.extend_from_slice(&self.module_type);
        for size in self.pool_sizes {
            binary::write_u64_le(&mut buf, size as u64);
        }
        let descriptors = bincode::serialize(&(&self.inputs, &self.outputs))
            .map_err(|e| Error::InvalidModule(format!("cannot encode descriptors: {e}")))?;
        binary::write_blob(&mut buf, &descriptors)?;

        binary::write_u32_le(&mut buf, binary::to_u32(self.sections.len(), "section count")?);
        for section in &self.sections {
            let name = section.name.as_bytes();
            let len = u8::try_from(name.len()).map_err(|_| {
                Error::InvalidModule(format!("section name {:?} is too long", section.name))
            })?;
            binary::write_u8(&mut buf, len);
            buf.extend_from_slice(name);
            binary::write_blob(&mut buf, &section.body)?;
        }
        Ok(buf)
    }

    /// Reject pool sizes over `MAX_POOL_SIZE`, I/O views outside their pool
    /// and `.rdata` larger than the rdata pool.
    pub fn validate(&self) -> Result<()> {
        for (index, &size) in self.pool_sizes.iter().enumerate() {
            if size > MAX_POOL_SIZE {
                return Err(Error::InvalidModule(format!(
                    "pool {index} asks for {size} bytes, the limit is {MAX_POOL_SIZE}"
                )));
            }
        }
        for view in self.inputs.iter().chain(&self.outputs) {
            let buffer = view.buffer;
            let fits = buffer
                .start
                .checked_add(buffer.size)
                .is_some_and(|end| end <= self.pool_sizes[buffer.location.index()]);
            if !fits {
                return Err(Error::InvalidModule(format!(
                    "buffer {buffer:?} lies outside its pool of {} bytes",
                    self.pool_sizes[buffer.location.index()]
                )));
            }
        }
        let rdata = self.rdata().len();
        let pool = self.pool_sizes[MemoryLocation::Rdata.index()];
        if rdata > pool {
            return Err(Error::InvalidModule(format!(
                ".rdata holds {rdata} bytes but the rdata pool is {pool} bytes"
            )));
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes).map_err(|e| match e {
            Error::InvalidProgram(msg) => Error::InvalidModule(msg),
            other => other,
        })
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = BinaryReader::new(bytes);
        if r.read_bytes(4)? != MODULE_MAGIC {
            return Err(Error::InvalidModule("bad magic".into()));
        }
        let version = r.read_u32_le()?;
        if version != MODULE_VERSION {
            return Err(Error::InvalidModule(format!(
                "unsupported version {version}, expected {MODULE_VERSION}"
            )));
        }
        let mut module_type = [0u8; 8];
        module_type.copy_from_slice(r.read_bytes(8)?);

        let mut pool_sizes = [0usize; MemoryLocation::COUNT];
        for size in &mut pool_sizes {
            let raw = r.read_u64_le()?;
            *size = usize::try_from(raw)
                .map_err(|_| Error::InvalidModule(format!("pool size {raw} too large")))?;
        }

        let (inputs, outputs): (Vec<MemoryView>, Vec<MemoryView>) =
            bincode::deserialize(r.read_blob()?)
                .map_err(|e| Error::InvalidModule(format!("bad descriptors: {e}")))?;

        let count = r.read_u32_le()?;
        let mut sections = Vec::new();
        for _ in 0..count {
            let len = r.read_u8()? as usize;
            let name = std::str::from_utf8(r.read_bytes(len)?)
                .map_err(|_| Error::InvalidModule("section name is not utf-8".into()))?
                .to_string();
            let body = r.read_blob()?.to_vec();
            sections.push(Section { name, body });
        }
        if !r.is_empty() {
            return Err(Error::InvalidModule(format!(
                "{} trailing bytes after the last section",
                r.remaining()
            )));
        }

        let module = Self {
            module_type,
            pool_sizes,
            inputs,
            outputs,
            sections,
        };
        module.validate()?;
        Ok(module)
    }
}
