//! Scene-graph types shared by the engine's tests.

use objstream_codec::{PayloadReader, PayloadWriter};
use objstream_format::FileDataRef;

use crate::error::{EngineError, EngineResult};
use crate::finalize::FinalizeContext;
use crate::graph::{FieldSite, Handle, Persistable, SharedBuffer, StageId};
use crate::reader::ReadContext;
use crate::registry::{Decode, TypeRegistry};
use crate::writer::WriteContext;

fn bad_site(type_name: &str, site: FieldSite) -> EngineError {
    EngineError::InvariantViolation(format!("{type_name} has no reference at {site}"))
}

/// A labelled node with any number of outgoing links.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub label: String,
    pub links: Vec<Option<Handle>>,
}

impl Node {
    pub fn new(label: &str) -> Self {
        Self::with_links(label, Vec::new())
    }

    pub fn with_links(label: &str, links: Vec<Option<Handle>>) -> Self {
        Self {
            label: label.to_owned(),
            links,
        }
    }
}

impl Persistable for Node {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        out.put_str(&self.label);
        out.put_varint(self.links.len() as u64);
        for link in &self.links {
            ctx.write_ref(out, *link)?;
        }
        Ok(())
    }

    fn complete_pointer(&mut self, site: FieldSite, target: Handle) -> EngineResult<()> {
        let slot = self
            .links
            .get_mut(site.index as usize)
            .ok_or_else(|| bad_site(Self::TYPE_NAME, site))?;
        *slot = Some(target);
        Ok(())
    }
}

impl Decode for Node {
    const TYPE_NAME: &'static str = "Node";

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self> {
        let label = r.get_str()?.to_owned();
        let count = r.get_varint()? as usize;
        let links = ctx.read_refs(r, count)?;
        let seen = ctx.get_int_tag("nodes").unwrap_or(0);
        ctx.set_int_tag("nodes", seen + 1);
        Ok(Self { label, links })
    }
}

/// Geometry whose arrays may be shared with other meshes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mesh {
    pub name: String,
    pub vertices: Option<SharedBuffer>,
    pub indices: Option<SharedBuffer>,
}

impl Mesh {
    pub fn new(name: &str, vertices: Option<SharedBuffer>, indices: Option<SharedBuffer>) -> Self {
        Self {
            name: name.to_owned(),
            vertices,
            indices,
        }
    }
}

impl Persistable for Mesh {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        out.put_str(&self.name);
        ctx.write_buffer(out, self.vertices.as_ref())?;
        ctx.write_buffer(out, self.indices.as_ref())
    }
}

impl Decode for Mesh {
    const TYPE_NAME: &'static str = "Mesh";

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self> {
        let name = r.get_str()?.to_owned();
        let vertices = ctx.read_buffer(r)?;
        let indices = ctx.read_buffer(r)?;
        Ok(Self {
            name,
            vertices,
            indices,
        })
    }
}

/// Asks for finalization twice and records what the hook saw.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub value: i64,
    pub target: Option<Handle>,
    pub finalize_calls: u32,
    pub nodes_at_finalize: Option<i64>,
}

impl Counter {
    pub fn new(value: i64, target: Option<Handle>) -> Self {
        Self {
            value,
            target,
            ..Default::default()
        }
    }
}

impl Persistable for Counter {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        out.put_i64(self.value);
        ctx.write_ref(out, self.target)
    }

    fn complete_pointer(&mut self, site: FieldSite, target: Handle) -> EngineResult<()> {
        if site != FieldSite::new(0) {
            return Err(bad_site(Self::TYPE_NAME, site));
        }
        self.target = Some(target);
        Ok(())
    }

    fn finalize(&mut self, ctx: &FinalizeContext<'_>) -> EngineResult<()> {
        self.finalize_calls += 1;
        self.nodes_at_finalize = ctx.get_int_tag("nodes");
        self.value *= ctx.get_aux_data::<i64>("scale").copied().unwrap_or(1);
        Ok(())
    }
}

impl Decode for Counter {
    const TYPE_NAME: &'static str = "Counter";

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self> {
        let value = r.get_i64()?;
        let target = ctx.read_ref(r)?;
        ctx.set_aux_data("scale", 10i64);
        ctx.register_finalize();
        ctx.register_finalize();
        Ok(Self::new(value, target))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageData {
    pub weight: f64,
    pub target: Option<Handle>,
}

/// Two alternative representations, each with its own reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Staged {
    pub stages: [StageData; 2],
}

impl Persistable for Staged {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        for stage in &self.stages {
            out.put_float(stage.weight);
            ctx.write_ref(out, stage.target)?;
        }
        Ok(())
    }

    fn complete_pointer(&mut self, site: FieldSite, target: Handle) -> EngineResult<()> {
        let stage = site
            .stage
            .and_then(|s| self.stages.get_mut(usize::from(s.0)))
            .filter(|_| site.index == 0)
            .ok_or_else(|| bad_site(Self::TYPE_NAME, site))?;
        stage.target = Some(target);
        Ok(())
    }
}

impl Decode for Staged {
    const TYPE_NAME: &'static str = "Staged";

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self> {
        let mut staged = Self::default();
        for (i, slot) in staged.stages.iter_mut().enumerate() {
            *slot = ctx.read_stage(StageId(i as u8), |ctx| {
                let weight = r.get_float()?;
                let target = ctx.read_ref(r)?;
                Ok(StageData { weight, target })
            })?;
        }
        Ok(staged)
    }
}

/// Keeps its pixels out of band.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Texture {
    pub name: String,
    pub pixels: Vec<u8>,
    pub pixel_ref: Option<FileDataRef>,
}

impl Texture {
    pub fn new(name: &str, pixels: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            pixels,
            pixel_ref: None,
        }
    }
}

impl Persistable for Texture {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        out.put_str(&self.name);
        ctx.write_file_data(self.pixels.clone())
    }
}

impl Decode for Texture {
    const TYPE_NAME: &'static str = "Texture";

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self> {
        let name = r.get_str()?.to_owned();
        let pixel_ref = ctx.read_file_data()?;
        Ok(Self {
            name,
            pixels: Vec::new(),
            pixel_ref: Some(pixel_ref),
        })
    }
}

/// Shares buffers with meshes. Never registered, so permissive readers
/// skip it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Skin {
    pub weights: Option<SharedBuffer>,
}

impl Persistable for Skin {
    fn type_name(&self) -> &'static str {
        "Skin"
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        ctx.write_buffer(out, self.weights.as_ref())
    }
}

/// Writes two references but keeps only the first when read back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Proxy {
    pub kept: Option<Handle>,
    pub dropped: Option<Handle>,
}

impl Persistable for Proxy {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn encode(&self, out: &mut PayloadWriter, ctx: &mut WriteContext<'_>) -> EngineResult<()> {
        ctx.write_ref(out, self.kept)?;
        ctx.write_ref(out, self.dropped)
    }

    fn complete_pointer(&mut self, site: FieldSite, target: Handle) -> EngineResult<()> {
        if site != FieldSite::new(0) {
            return Err(bad_site(Self::TYPE_NAME, site));
        }
        self.kept = Some(target);
        Ok(())
    }
}

impl Decode for Proxy {
    const TYPE_NAME: &'static str = "Proxy";

    fn decode(r: &mut PayloadReader<'_>, ctx: &mut ReadContext<'_>) -> EngineResult<Self> {
        let kept = ctx.read_ref(r)?;
        ctx.skip_ref(r)?;
        Ok(Self { kept, dropped: None })
    }
}

/// A registry with every fixture type.
pub fn registry() -> TypeRegistry {
    let mut reg = TypeRegistry::new();
    reg.register_type::<Node>().unwrap();
    reg.register_type::<Mesh>().unwrap();
    reg.register_type::<Counter>().unwrap();
    reg.register_type::<Staged>().unwrap();
    reg.register_type::<Texture>().unwrap();
    reg.register_type::<Proxy>().unwrap();
    reg
}
