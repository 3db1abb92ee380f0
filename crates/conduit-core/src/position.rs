//! World coordinates, chunk coordinates, and the six cube faces.

use crate::id::WorldId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A block position in a world. Totally ordered (world, x, y, z) so it can
/// key ordered maps and give deterministic iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub world: WorldId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub fn new(world: WorldId, x: i32, y: i32, z: i32) -> Self {
        Self { world, x, y, z }
    }

    /// The neighbouring position across `face`. `None` past the edge of the
    /// coordinate space.
    pub fn offset(&self, face: BlockFace) -> Option<Self> {
        let (dx, dy, dz) = face.offset();
        Some(Self {
            world: self.world,
            x: self.x.checked_add(dx)?,
            y: self.y.checked_add(dy)?,
            z: self.z.checked_add(dz)?,
        })
    }

    /// The chunk containing this position.
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos {
            world: self.world,
            x: self.x.div_euclid(ChunkPos::SIZE),
            z: self.z.div_euclid(ChunkPos::SIZE),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@({}, {}, {})", self.world.0, self.x, self.y, self.z)
    }
}

/// A 16x16 column of blocks, the unit in which the world loads and unloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub world: WorldId,
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const SIZE: i32 = 16;

    pub fn new(world: WorldId, x: i32, z: i32) -> Self {
        Self { world, x, z }
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.chunk() == *self
    }
}

// ---------------------------------------------------------------------------
// BlockFace
// ---------------------------------------------------------------------------

/// The six faces of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlockFace {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl BlockFace {
    pub const ALL: [BlockFace; 6] = [
        BlockFace::North,
        BlockFace::East,
        BlockFace::South,
        BlockFace::West,
        BlockFace::Up,
        BlockFace::Down,
    ];

    /// Unit offset (dx, dy, dz) towards this face.
    pub fn offset(&self) -> (i32, i32, i32) {
        match self {
            BlockFace::North => (0, 0, -1),
            BlockFace::East => (1, 0, 0),
            BlockFace::South => (0, 0, 1),
            BlockFace::West => (-1, 0, 0),
            BlockFace::Up => (0, 1, 0),
            BlockFace::Down => (0, -1, 0),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            BlockFace::North => BlockFace::South,
            BlockFace::East => BlockFace::West,
            BlockFace::South => BlockFace::North,
            BlockFace::West => BlockFace::East,
            BlockFace::Up => BlockFace::Down,
            BlockFace::Down => BlockFace::Up,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

// ---------------------------------------------------------------------------
// FaceMap / FaceSet
// ---------------------------------------------------------------------------

/// A value for each of the six faces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceMap<T>([T; 6]);

impl<T: Clone> FaceMap<T> {
    /// Every face set to `value`.
    pub fn splat(value: T) -> Self {
        Self(std::array::from_fn(|_| value.clone()))
    }
}

impl<T> FaceMap<T> {
    pub fn from_fn(mut f: impl FnMut(BlockFace) -> T) -> Self {
        Self(std::array::from_fn(|i| f(BlockFace::ALL[i])))
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockFace, &T)> {
        BlockFace::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T: Default> Default for FaceMap<T> {
    fn default() -> Self {
        Self(std::array::from_fn(|_| T::default()))
    }
}

impl<T> Index<BlockFace> for FaceMap<T> {
    type Output = T;

    fn index(&self, face: BlockFace) -> &T {
        &self.0[face.index()]
    }
}

impl<T> IndexMut<BlockFace> for FaceMap<T> {
    fn index_mut(&mut self, face: BlockFace) -> &mut T {
        &mut self.0[face.index()]
    }
}

/// A set of faces stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FaceSet(u8);

impl FaceSet {
    pub const EMPTY: FaceSet = FaceSet(0);
    pub const ALL: FaceSet = FaceSet(0b11_1111);

    pub fn of(faces: impl IntoIterator<Item = BlockFace>) -> Self {
        let mut set = Self::EMPTY;
        for face in faces {
            set.insert(face);
        }
        set
    }

    pub fn insert(&mut self, face: BlockFace) {
        self.0 |= 1 << face.index();
    }

    pub fn remove(&mut self, face: BlockFace) {
        self.0 &= !(1 << face.index());
    }

    pub fn contains(&self, face: BlockFace) -> bool {
        self.0 & (1 << face.index()) != 0
    }

    pub fn union(&self, other: FaceSet) -> FaceSet {
        FaceSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockFace> + '_ {
        BlockFace::ALL.into_iter().filter(|f| self.contains(*f))
    }
}
