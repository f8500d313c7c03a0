// point_cloud.rs - Input scene: a list of point light sources.
//
// Positions are in metres in the scene frame. The hologram plane is the
// plane z = hologram_z; sources are normally placed behind it (z < 0 with
// hologram_z = 0) but nothing here enforces that.

/// A single point light source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointSource {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Real amplitude of the emitted spherical wave.
    pub amplitude: f32,
    /// Initial phase in radians.
    pub phase: f32,
}

impl PointSource {
    pub fn new(x: f32, y: f32, z: f32, amplitude: f32, phase: f32) -> Self {
        PointSource { x, y, z, amplitude, phase }
    }
}

/// An ordered set of point sources. The renderer only ever reads it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<PointSource>,
}

impl PointCloud {
    pub fn new() -> Self {
        PointCloud { points: Vec::new() }
    }

    pub fn from_vec(points: Vec<PointSource>) -> Self {
        PointCloud { points }
    }

    pub fn push(&mut self, p: PointSource) {
        self.points.push(p);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&PointSource> {
        self.points.get(i)
    }

    pub fn as_slice(&self) -> &[PointSource] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PointSource> {
        self.points.iter()
    }
}

impl FromIterator<PointSource> for PointCloud {
    fn from_iter<I: IntoIterator<Item = PointSource>>(iter: I) -> Self {
        PointCloud { points: iter.into_iter().collect() }
    }
}

impl std::ops::Index<usize> for PointCloud {
    type Output = PointSource;

    fn index(&self, i: usize) -> &PointSource {
        &self.points[i]
    }
}
