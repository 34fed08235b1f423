//! Grid Engine
//!
//! Double-buffered Game of Life board with a row-parallel step.
//! Rows are dealt round-robin: lane `i` of `N` owns rows `i, i+N, i+2N, …`,
//! with `N` clamped to the row count.
//! Every lane reads the current generation and writes only its own rows of the
//! next one, so no lane ever waits on another until the scope joins.

pub mod lattice;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::{GolError, GolResult};
pub use lattice::{Cell, Lattice, World};

pub struct GridEngine {
    current: Lattice,
    previous: Lattice,
    threads: usize,
    /// Built once per run and reused every turn; `scope` is the barrier.
    pool: ThreadPool,
}

impl GridEngine {
    /// Copies `world` into the current buffer. The previous buffer starts dead,
    /// so the first `delta` lists exactly the initially live cells.
    pub fn new(world: &World, threads: usize) -> GolResult<Self> {
        let current = Lattice::from_world(world)?;
        let previous = Lattice::new(current.width(), current.height())?;
        // More lanes than rows would only leave threads idle.
        let threads = threads.clamp(1, current.height());
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gol-lane-{}", i))
            .build()
            .map_err(|e| GolError::Engine(e.to_string()))?;

        debug!(
            "[GridEngine] {}x{} board, {} lanes",
            current.width(),
            current.height(),
            threads
        );

        Ok(GridEngine {
            current,
            previous,
            threads,
            pool,
        })
    }

    /// Advance one generation.
    ///
    /// The next generation is written into the stale buffer and only becomes
    /// `current` after every lane has finished.
    pub fn step(&mut self) {
        let lanes_n = self.threads;
        let source = &self.current;

        let mut lanes: Vec<Vec<(usize, &mut [bool])>> = (0..lanes_n).map(|_| Vec::new()).collect();
        for (y, row) in self.previous.rows_mut().enumerate() {
            lanes[y % lanes_n].push((y, row));
        }

        self.pool.scope(move |scope| {
            for lane in lanes {
                scope.spawn(move |_| {
                    for (y, row) in lane {
                        for (x, cell) in row.iter_mut().enumerate() {
                            *cell = source.next_state(x, y);
                        }
                    }
                });
            }
        });

        std::mem::swap(&mut self.current, &mut self.previous);
    }

    /// Cells that changed during the last `step`.
    pub fn delta(&self) -> Vec<Cell> {
        self.previous.diff(&self.current)
    }

    pub fn current(&self) -> &Lattice {
        &self.current
    }

    pub fn alive_count(&self) -> usize {
        self.current.alive_count()
    }

    pub fn snapshot(&self) -> World {
        self.current.to_world()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn cells(list: &[(usize, usize)]) -> Vec<Cell> {
        list.iter().map(|&(x, y)| Cell::new(x, y)).collect()
    }

    #[test]
    fn dead_board_stays_dead() {
        let mut engine = GridEngine::new(&World::empty(6, 5), 3).unwrap();
        engine.step();
        assert_eq!(engine.alive_count(), 0);
        assert!(engine.delta().is_empty());
    }

    #[test]
    fn isolated_cell_dies() {
        let mut engine = GridEngine::new(&World::with_alive(6, 6, &cells(&[(2, 2)])), 2).unwrap();
        engine.step();
        assert_eq!(engine.alive_count(), 0);
        assert_eq!(engine.delta(), cells(&[(2, 2)]));
    }

    #[test]
    fn block_is_a_fixed_point() {
        let block = cells(&[(1, 1), (2, 1), (1, 2), (2, 2)]);
        let mut engine = GridEngine::new(&World::with_alive(4, 4, &block), 4).unwrap();
        engine.step();
        assert_eq!(engine.current().alive_cells(), block);
        assert!(engine.delta().is_empty());
    }

    #[test]
    fn block_split_across_the_corner_survives() {
        let block = cells(&[(0, 0), (7, 0), (0, 7), (7, 7)]);
        let mut engine = GridEngine::new(&World::with_alive(8, 8, &block), 3).unwrap();
        for _ in 0..3 {
            engine.step();
        }
        assert_eq!(engine.current().alive_cells(), cells(&[(0, 0), (7, 0), (0, 7), (7, 7)]));
    }

    #[test]
    fn blinker_oscillates_with_period_two() {
        let vertical = cells(&[(3, 2), (3, 3), (3, 4)]);
        let mut engine = GridEngine::new(&World::with_alive(8, 8, &vertical), 4).unwrap();

        engine.step();
        assert_eq!(engine.current().alive_cells(), cells(&[(2, 3), (3, 3), (4, 3)]));
        let mut flipped = engine.delta();
        flipped.sort();
        assert_eq!(flipped, cells(&[(2, 3), (3, 2), (3, 4), (4, 3)]));

        engine.step();
        assert_eq!(engine.current().alive_cells(), vertical);
        assert_eq!(engine.alive_count(), 3);
    }

    #[test]
    fn glider_wraps_back_to_its_start() {
        // A glider moves one cell diagonally every 4 generations; on an 8x8
        // torus it is home after 32.
        let glider = cells(&[(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)]);
        let mut engine = GridEngine::new(&World::with_alive(8, 8, &glider), 5).unwrap();
        for _ in 0..32 {
            engine.step();
            assert_eq!(engine.alive_count(), 5);
        }
        assert_eq!(engine.current().alive_cells(), glider);
    }

    #[test]
    fn lane_count_does_not_change_the_result() {
        let mut rng = StdRng::seed_from_u64(0x60);
        let (w, h) = (37, 23);
        let soup: Vec<Cell> = (0..h)
            .flat_map(|y| (0..w).map(move |x| Cell::new(x, y)))
            .filter(|_| rng.gen_bool(0.35))
            .collect();
        let world = World::with_alive(w, h, &soup);

        let mut single = GridEngine::new(&world, 1).unwrap();
        let mut several = GridEngine::new(&world, 7).unwrap();
        let mut oversized = GridEngine::new(&world, 64).unwrap();
        for _ in 0..10 {
            single.step();
            several.step();
            oversized.step();
            assert_eq!(single.current(), several.current());
            assert_eq!(single.current(), oversized.current());
        }
    }

    #[test]
    fn lane_count_stays_between_one_and_the_row_count() {
        assert_eq!(GridEngine::new(&World::empty(4, 4), 0).unwrap().threads(), 1);
        assert_eq!(GridEngine::new(&World::empty(9, 6), 4).unwrap().threads(), 4);
        assert_eq!(GridEngine::new(&World::empty(9, 6), 1 << 20).unwrap().threads(), 6);
    }

    #[test]
    fn first_delta_lists_initial_population() {
        let initial = cells(&[(0, 1), (3, 3)]);
        let engine = GridEngine::new(&World::with_alive(5, 5, &initial), 2).unwrap();
        assert_eq!(engine.delta(), initial);
    }
}
