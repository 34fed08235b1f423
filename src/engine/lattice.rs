// lattice.rs — one generation of the board, row-major.
//
// Toroidal: a lookup one cell past any edge lands on the opposite edge.
// Nothing ever asks for a neighbour two cells away, so only that case wraps.

use serde::{Deserialize, Serialize};

use crate::error::{GolError, GolResult};

/// Coordinate of a single cell: `x` is the column, `y` the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Cell { x, y }
    }
}

/// Board as it travels on the wire: rows outer, columns inner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<Vec<bool>>,
}

impl World {
    pub fn empty(width: usize, height: usize) -> Self {
        World {
            width,
            height,
            cells: vec![vec![false; width]; height],
        }
    }

    /// Dead board with the listed cells brought to life.
    pub fn with_alive(width: usize, height: usize, alive: &[Cell]) -> Self {
        let mut world = World::empty(width, height);
        for cell in alive {
            world.cells[cell.y][cell.x] = true;
        }
        world
    }

    /// Live cells in row-major order.
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .flat_map(|(y, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, alive)| **alive)
                    .map(move |(x, _)| Cell::new(x, y))
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lattice {
    width: usize,
    height: usize,
    cells: Vec<bool>,
}

impl Lattice {
    /// All-dead lattice. Both dimensions must be at least 2.
    pub fn new(width: usize, height: usize) -> GolResult<Self> {
        if width < 2 || height < 2 {
            return Err(GolError::InvalidWorld(format!(
                "{}x{} is too small for wraparound, need at least 2x2",
                width, height
            )));
        }
        let size = width.checked_mul(height).ok_or_else(|| {
            GolError::InvalidWorld(format!("{}x{} does not fit in memory", width, height))
        })?;
        Ok(Lattice {
            width,
            height,
            cells: vec![false; size],
        })
    }

    /// Rows are checked against the declared size before anything is allocated.
    pub fn from_world(world: &World) -> GolResult<Self> {
        if world.cells.len() != world.height {
            return Err(GolError::InvalidWorld(format!(
                "expected {} rows, got {}",
                world.height,
                world.cells.len()
            )));
        }
        for (y, row) in world.cells.iter().enumerate() {
            if row.len() != world.width {
                return Err(GolError::InvalidWorld(format!(
                    "row {} has {} cells, expected {}",
                    y,
                    row.len(),
                    world.width
                )));
            }
        }

        let mut lattice = Lattice::new(world.width, world.height)?;
        for (y, row) in world.cells.iter().enumerate() {
            let start = y * world.width;
            lattice.cells[start..start + world.width].copy_from_slice(row);
        }
        Ok(lattice)
    }

    pub fn to_world(&self) -> World {
        World {
            width: self.width,
            height: self.height,
            cells: self.cells.chunks(self.width).map(|row| row.to_vec()).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.cells[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, alive: bool) {
        self.cells[y * self.width + x] = alive;
    }

    /// Like `get`, but accepts coordinates one step outside the board.
    #[inline(always)]
    pub fn alive_at(&self, x: isize, y: isize) -> bool {
        self.get(wrap(x, self.width), wrap(y, self.height))
    }

    pub fn live_neighbours(&self, x: usize, y: usize) -> u8 {
        let (x, y) = (x as isize, y as isize);
        let mut count = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if (dx, dy) != (0, 0) && self.alive_at(x + dx, y + dy) {
                    count += 1;
                }
            }
        }
        count
    }

    /// B3/S23.
    pub fn next_state(&self, x: usize, y: usize) -> bool {
        match (self.get(x, y), self.live_neighbours(x, y)) {
            (_, 3) => true,
            (true, 2) => true,
            _ => false,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|alive| **alive).count()
    }

    pub fn alive_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
            .collect()
    }

    /// Cells whose state differs between `self` and `other`, row-major.
    /// Both lattices must share dimensions.
    pub fn diff(&self, other: &Lattice) -> Vec<Cell> {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        self.cells
            .iter()
            .zip(other.cells.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
            .collect()
    }

    pub(crate) fn rows_mut(&mut self) -> std::slice::ChunksMut<'_, bool> {
        self.cells.chunks_mut(self.width)
    }
}

#[inline(always)]
fn wrap(coord: isize, len: usize) -> usize {
    let len = len as isize;
    debug_assert!(
        (-1..=len).contains(&coord),
        "wraparound is only defined one cell past the edge"
    );
    if coord < 0 {
        (coord + len) as usize
    } else if coord >= len {
        (coord - len) as usize
    } else {
        coord as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbours_wrap_across_edges_and_corners() {
        let mut lattice = Lattice::new(5, 4).unwrap();
        lattice.set(4, 3, true); // opposite corner of (0, 0)
        lattice.set(0, 3, true); // wraps vertically
        lattice.set(4, 0, true); // wraps horizontally
        assert_eq!(lattice.live_neighbours(0, 0), 3);
        assert!(lattice.alive_at(-1, -1));
        assert_eq!(lattice.alive_at(5, 4), lattice.get(0, 0));
    }

    #[test]
    fn world_round_trip_keeps_orientation() {
        let world = World::with_alive(4, 3, &[Cell::new(3, 0), Cell::new(1, 2)]);
        let lattice = Lattice::from_world(&world).unwrap();
        assert!(lattice.get(3, 0));
        assert!(lattice.get(1, 2));
        assert!(!lattice.get(0, 0));
        assert_eq!(lattice.to_world(), world);
        assert_eq!(lattice.alive_cells(), world.alive_cells());
    }

    #[test]
    fn rejects_degenerate_and_ragged_worlds() {
        assert!(matches!(Lattice::new(1, 8), Err(GolError::InvalidWorld(_))));

        let mut ragged = World::empty(4, 4);
        ragged.cells[2].pop();
        assert!(matches!(Lattice::from_world(&ragged), Err(GolError::InvalidWorld(_))));

        let mut short = World::empty(4, 4);
        short.cells.pop();
        assert!(matches!(Lattice::from_world(&short), Err(GolError::InvalidWorld(_))));
    }

    #[test]
    fn oversized_dimensions_are_rejected_without_allocating() {
        let huge = World {
            width: 1 << 33,
            height: 1 << 33,
            cells: vec![],
        };
        assert!(matches!(Lattice::from_world(&huge), Err(GolError::InvalidWorld(_))));
        assert!(matches!(
            Lattice::new(usize::MAX, 2),
            Err(GolError::InvalidWorld(_))
        ));
    }

    #[test]
    fn diff_with_itself_is_empty() {
        let world = World::with_alive(6, 6, &[Cell::new(1, 1), Cell::new(2, 4), Cell::new(5, 5)]);
        let lattice = Lattice::from_world(&world).unwrap();
        assert!(lattice.diff(&lattice).is_empty());

        let mut other = lattice.clone();
        other.set(0, 3, true);
        other.set(5, 5, false);
        assert_eq!(lattice.diff(&other), vec![Cell::new(0, 3), Cell::new(5, 5)]);
    }
}
