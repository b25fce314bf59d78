use std::collections::BTreeMap;
use std::fmt;

/// Pipeline stage a source string is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Vertex,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Vertex, Stage::Geometry, Stage::Fragment, Stage::Compute];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Geometry => "geometry",
            Stage::Fragment => "fragment",
            Stage::Compute => "compute",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vertex" | "vert" => Some(Stage::Vertex),
            "geometry" | "geom" => Some(Stage::Geometry),
            "fragment" | "frag" => Some(Stage::Fragment),
            "compute" | "comp" => Some(Stage::Compute),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage source text plus preprocessor defines for one program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSources {
    stages: BTreeMap<Stage, String>,
    defines: BTreeMap<String, String>,
}

impl StageSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment program drawn with the builtin full-screen triangle.
    pub fn fullscreen(fragment: impl Into<String>) -> Self {
        Self::new()
            .with_stage(Stage::Vertex, FULLSCREEN_VERTEX_GLSL)
            .with_stage(Stage::Fragment, fragment)
    }

    pub fn with_stage(mut self, stage: Stage, source: impl Into<String>) -> Self {
        self.stages.insert(stage, source.into());
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    pub fn set_stage(&mut self, stage: Stage, source: impl Into<String>) {
        self.stages.insert(stage, source.into());
    }

    pub fn stage(&self, stage: Stage) -> Option<&str> {
        self.stages.get(&stage).map(String::as_str)
    }

    /// Stages in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, &str)> + '_ {
        self.stages
            .iter()
            .map(|(stage, source)| (*stage, source.as_str()))
    }

    pub fn defines(&self) -> &BTreeMap<String, String> {
        &self.defines
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Prepends a monolithic library string to every stage.
    pub fn with_prefix(&self, library: &str) -> Self {
        self.map_sources(|source| format!("{library}{source}"))
    }

    pub(crate) fn map_sources(&self, mut f: impl FnMut(&str) -> String) -> Self {
        Self {
            stages: self
                .stages
                .iter()
                .map(|(stage, source)| (*stage, f(source)))
                .collect(),
            defines: self.defines.clone(),
        }
    }
}

/// Minimal full-screen triangle vertex shader feeding `v_uv` at location 0.
pub const FULLSCREEN_VERTEX_GLSL: &str = r"layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";
