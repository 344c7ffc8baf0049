//! Sparse grid index kept in sync with agent movement
//!
//! Space is cut into square cells of `grid_size`. The index maps each
//! occupied cell to the agents in it and each agent to its last known cell,
//! and stays current by listening to the agent added/moved/removed channels.

use ahash::AHashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::error::{Result, SubstrateError};
use crate::core::types::{AgentId, DVec2};
use crate::entity::agent::Agent;
use crate::events::callbacks::{callback, Callback, CallbackSuite};

/// Integer cell index
pub type Cell = (i64, i64);

/// Quotients this close to an integer are treated as that integer
const SNAP_TOLERANCE: f64 = 1e-9;

/// Largest cell index magnitude (2^53); past it f64 cannot tell adjacent cells apart
const MAX_CELL_INDEX: f64 = 9_007_199_254_740_992.0;

/// Cell index along one axis, `None` when out of range
#[inline]
fn quantize(value: f64, grid_size: f64) -> Option<i64> {
    let q = value / grid_size;
    let nearest = q.round();
    let index = if (q - nearest).abs() < SNAP_TOLERANCE {
        nearest
    } else {
        q.floor()
    };
    (index.abs() <= MAX_CELL_INDEX).then_some(index as i64)
}

/// Something `inhabitants` can look up: one position or several
///
/// A two-element numeric array or tuple is one position, never two.
pub trait CellQuery {
    fn positions(&self) -> Vec<DVec2>;
}

impl CellQuery for DVec2 {
    fn positions(&self) -> Vec<DVec2> {
        vec![*self]
    }
}

impl CellQuery for [f64; 2] {
    fn positions(&self) -> Vec<DVec2> {
        vec![DVec2::from(*self)]
    }
}

impl CellQuery for (f64, f64) {
    fn positions(&self) -> Vec<DVec2> {
        vec![DVec2::new(self.0, self.1)]
    }
}

impl CellQuery for [DVec2] {
    fn positions(&self) -> Vec<DVec2> {
        self.to_vec()
    }
}

impl CellQuery for Vec<DVec2> {
    fn positions(&self) -> Vec<DVec2> {
        self.clone()
    }
}

impl<const N: usize> CellQuery for [DVec2; N] {
    fn positions(&self) -> Vec<DVec2> {
        self.to_vec()
    }
}

impl<T: CellQuery + ?Sized> CellQuery for &T {
    fn positions(&self) -> Vec<DVec2> {
        (**self).positions()
    }
}

struct GridCells {
    grid_size: f64,
    cells: AHashMap<Cell, Vec<AgentId>>,
    agent_cells: AHashMap<AgentId, Cell>,
}

impl GridCells {
    fn new(grid_size: f64) -> Self {
        Self {
            grid_size,
            cells: AHashMap::new(),
            agent_cells: AHashMap::new(),
        }
    }

    fn cell_coord(&self, pos: DVec2) -> Result<Cell> {
        match (quantize(pos.x, self.grid_size), quantize(pos.y, self.grid_size)) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(SubstrateError::InvalidPosition(format!(
                "{} is outside the cell range of grid size {}",
                pos, self.grid_size
            ))),
        }
    }

    /// The eight cells around the one containing `pos`
    fn neighbour_cells(&self, pos: DVec2) -> Result<Vec<Cell>> {
        let (cx, cy) = self.cell_coord(pos)?;
        Ok((-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dy| (dx, dy)))
            .filter(|&offset| offset != (0, 0))
            .filter_map(|(dx, dy)| Some((cx.checked_add(dx)?, cy.checked_add(dy)?)))
            .collect())
    }

    fn cell_origin(&self, cell: Cell) -> DVec2 {
        DVec2::new(cell.0 as f64 * self.grid_size, cell.1 as f64 * self.grid_size)
    }

    /// Move `agent` to the cell of its current position, or drop it once removed
    ///
    /// A position outside the cell range fails and leaves the index untouched.
    fn update(&mut self, agent: &Agent) -> Result<()> {
        let Some(position) = agent.position() else {
            return Ok(());
        };
        let id = agent.id();
        let target = if agent.exists() {
            Some(self.cell_coord(position)?)
        } else {
            None
        };

        if let Some(previous) = self.agent_cells.remove(&id) {
            if let Some(cell) = self.cells.get_mut(&previous) {
                cell.retain(|&e| e != id);
                if cell.is_empty() {
                    self.cells.remove(&previous);
                }
            }
        }

        if let Some(coord) = target {
            self.cells.entry(coord).or_default().push(id);
            self.agent_cells.insert(id, coord);
            tracing::trace!("Agent {} now in cell {:?}", id, coord);
        }
        Ok(())
    }
}

/// Handle to a simulation's grid index
///
/// Clones share the same index.
#[derive(Clone)]
pub struct GridIndex {
    state: Arc<Mutex<Option<GridCells>>>,
    maintenance: Callback<Agent>,
}

impl GridIndex {
    pub fn new() -> Self {
        let state: Arc<Mutex<Option<GridCells>>> = Arc::new(Mutex::new(None));
        let maintenance = {
            let state = Arc::clone(&state);
            callback(move |agent: &Agent| {
                let mut guard = state
                    .lock()
                    .map_err(|_| SubstrateError::LockPoisoned("grid index"))?;
                let outcome = match guard.as_mut() {
                    Some(cells) => cells.update(agent),
                    None => Ok(()),
                };
                outcome
            })
        };
        Self { state, maintenance }
    }

    /// (Re)build the index from `agents` and start listening for changes
    pub fn initialize<'a>(
        &self,
        grid_size: f64,
        agents: impl IntoIterator<Item = &'a Agent>,
        callbacks: &CallbackSuite,
    ) -> Result<()> {
        if !(grid_size.is_finite() && grid_size > 0.0) {
            return Err(SubstrateError::InvalidGridSize(grid_size));
        }

        let mut cells = GridCells::new(grid_size);
        for agent in agents {
            cells.update(agent)?;
        }
        let occupied = cells.cells.len();
        *self.lock()? = Some(cells);

        callbacks.agent_added.subscribe(&self.maintenance);
        callbacks.agent_moved.subscribe(&self.maintenance);
        callbacks.agent_removed.subscribe(&self.maintenance);

        tracing::debug!("Grid index initialized: size {}, {} occupied cells", grid_size, occupied);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn grid_size(&self) -> Option<f64> {
        self.lock().ok()?.as_ref().map(|c| c.grid_size)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<GridCells>>> {
        self.state
            .lock()
            .map_err(|_| SubstrateError::LockPoisoned("grid index"))
    }

    fn with_cells<T>(&self, f: impl FnOnce(&GridCells) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let cells = guard.as_ref().ok_or(SubstrateError::IndexNotInitialized)?;
        f(cells)
    }

    /// Origin of the cell containing `pos`
    pub fn cell_of(&self, pos: DVec2) -> Result<DVec2> {
        self.with_cells(|c| Ok(c.cell_origin(c.cell_coord(pos)?)))
    }

    /// Origins of the eight cells around the one containing `pos`
    pub fn neighbour_coordinates(&self, pos: DVec2) -> Result<Vec<DVec2>> {
        self.with_cells(|c| {
            Ok(c.neighbour_cells(pos)?
                .into_iter()
                .map(|cell| c.cell_origin(cell))
                .collect())
        })
    }

    /// Agents in the cells containing the queried position(s), in query order
    pub fn inhabitants(&self, query: impl CellQuery) -> Result<Vec<AgentId>> {
        let positions = query.positions();
        self.with_cells(|c| {
            let mut found = Vec::new();
            for &pos in &positions {
                if let Some(ids) = c.cells.get(&c.cell_coord(pos)?) {
                    found.extend_from_slice(ids);
                }
            }
            Ok(found)
        })
    }

    /// Agents in the eight cells around `pos`, excluding its own cell
    pub fn neighbours(&self, pos: DVec2) -> Result<Vec<AgentId>> {
        self.with_cells(|c| {
            Ok(c.neighbour_cells(pos)?
                .iter()
                .filter_map(|cell| c.cells.get(cell))
                .flatten()
                .copied()
                .collect())
        })
    }

    /// Number of occupied cells
    pub fn cell_count(&self) -> Result<usize> {
        self.with_cells(|c| Ok(c.cells.len()))
    }

    /// Cell an agent was last recorded in
    pub fn agent_cell(&self, agent: AgentId) -> Result<Option<DVec2>> {
        self.with_cells(|c| Ok(c.agent_cells.get(&agent).map(|&cell| c.cell_origin(cell))))
    }
}

impl Default for GridIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GridIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridIndex")
            .field("grid_size", &self.grid_size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spatial(x: f64, y: f64) -> Agent {
        Agent::spatial(DVec2::new(x, y)).unwrap()
    }

    #[test]
    fn test_quantize_floors_and_snaps() {
        assert_eq!(quantize(4.99, 5.0), Some(0));
        assert_eq!(quantize(5.0, 5.0), Some(1));
        assert_eq!(quantize(-0.01, 5.0), Some(-1));
        assert_eq!(quantize(0.3, 0.1), Some(3));
        assert_eq!(quantize(-5.0, 5.0), Some(-1));
        assert_eq!(quantize(1e30, 1.0), None);
        assert_eq!(quantize(-1e30, 1.0), None);
    }

    #[test]
    fn test_out_of_range_positions_rejected() {
        let suite = CallbackSuite::new();
        let grid = GridIndex::new();
        grid.initialize(1.0, std::iter::empty(), &suite).unwrap();

        let far = spatial(1e30, 0.0);
        assert!(matches!(suite.agent_added.fire(&far), Err(SubstrateError::InvalidPosition(_))));
        assert_eq!(grid.cell_count().unwrap(), 0);
        assert_eq!(grid.agent_cell(far.id()).unwrap(), None);

        let far_pos = DVec2::new(1e30, 0.0);
        assert!(matches!(grid.neighbours(far_pos), Err(SubstrateError::InvalidPosition(_))));
        assert!(matches!(grid.cell_of(far_pos), Err(SubstrateError::InvalidPosition(_))));
        assert!(matches!(grid.inhabitants(far_pos), Err(SubstrateError::InvalidPosition(_))));

        let rebuilt = GridIndex::new();
        assert!(matches!(
            rebuilt.initialize(1.0, [&far], &CallbackSuite::new()),
            Err(SubstrateError::InvalidPosition(_))
        ));
        assert!(!rebuilt.is_initialized());
    }

    #[test]
    fn test_distant_cells_stay_distinct() {
        let a = spatial(1e15, 0.0);
        let b = spatial(5e15, 0.0);
        let grid = GridIndex::new();
        grid.initialize(1.0, [&a, &b], &CallbackSuite::new()).unwrap();

        assert_eq!(grid.inhabitants(DVec2::new(1e15, 0.0)).unwrap(), vec![a.id()]);
        assert_eq!(grid.inhabitants(DVec2::new(5e15, 0.0)).unwrap(), vec![b.id()]);
        assert_eq!(grid.cell_count().unwrap(), 2);
    }

    #[test]
    fn test_neighbours_at_range_edge() {
        let edge = DVec2::new(MAX_CELL_INDEX, 0.0);
        let a = spatial(edge.x, edge.y);
        let b = spatial(MAX_CELL_INDEX - 1.0, 0.0);
        let grid = GridIndex::new();
        grid.initialize(1.0, [&a, &b], &CallbackSuite::new()).unwrap();

        assert_eq!(grid.neighbours(edge).unwrap(), vec![b.id()]);
        assert_eq!(grid.neighbour_coordinates(edge).unwrap().len(), 8);
    }

    #[test]
    fn test_queries_before_initialize_fail() {
        let grid = GridIndex::new();
        assert!(!grid.is_initialized());
        assert!(matches!(grid.cell_count(), Err(SubstrateError::IndexNotInitialized)));
        assert!(matches!(grid.neighbours(DVec2::ZERO), Err(SubstrateError::IndexNotInitialized)));
        assert!(matches!(grid.inhabitants(DVec2::ZERO), Err(SubstrateError::IndexNotInitialized)));
    }

    #[test]
    fn test_rejects_bad_grid_size() {
        let grid = GridIndex::new();
        let suite = CallbackSuite::new();
        for size in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                grid.initialize(size, std::iter::empty(), &suite),
                Err(SubstrateError::InvalidGridSize(_))
            ));
        }
        assert!(suite.agent_moved.is_empty());
    }

    #[test]
    fn test_neighbour_coordinates_exclude_own_cell() {
        let grid = GridIndex::new();
        grid.initialize(5.0, std::iter::empty(), &CallbackSuite::new()).unwrap();

        let coords = grid.neighbour_coordinates(DVec2::new(7.0, 2.0)).unwrap();
        assert_eq!(coords.len(), 8);
        assert!(!coords.contains(&DVec2::new(5.0, 0.0)));
        assert!(coords.contains(&DVec2::new(0.0, -5.0)));
        assert!(coords.contains(&DVec2::new(10.0, 5.0)));
        assert_eq!(grid.cell_of(DVec2::new(7.0, 2.0)).unwrap(), DVec2::new(5.0, 0.0));
    }

    #[test]
    fn test_adjacent_cells_see_each_other() {
        let a = spatial(0.0, 0.0);
        let b = spatial(0.0, 5.0);
        let grid = GridIndex::new();
        grid.initialize(5.0, [&a, &b], &CallbackSuite::new()).unwrap();

        assert_eq!(grid.neighbours(DVec2::new(0.0, 0.0)).unwrap(), vec![b.id()]);
        assert_eq!(grid.neighbours(DVec2::new(0.0, 5.0)).unwrap(), vec![a.id()]);
        assert_eq!(grid.cell_count().unwrap(), 2);
    }

    #[test]
    fn test_single_and_multiple_queries() {
        let a = spatial(1.0, 1.0);
        let b = spatial(6.0, 1.0);
        let grid = GridIndex::new();
        grid.initialize(5.0, [&a, &b], &CallbackSuite::new()).unwrap();

        assert_eq!(grid.inhabitants([1.0, 1.0]).unwrap(), vec![a.id()]);
        assert_eq!(grid.inhabitants((6.0, 1.0)).unwrap(), vec![b.id()]);
        assert_eq!(
            grid.inhabitants([DVec2::new(6.0, 1.0), DVec2::new(1.0, 1.0)]).unwrap(),
            vec![b.id(), a.id()]
        );
        let queries = vec![DVec2::new(1.0, 1.0), DVec2::new(50.0, 50.0)];
        assert_eq!(grid.inhabitants(&queries).unwrap(), vec![a.id()]);
        assert_eq!(grid.inhabitants(queries.as_slice()).unwrap(), vec![a.id()]);
    }

    #[test]
    fn test_notifications_keep_index_current() {
        let suite = CallbackSuite::new();
        let grid = GridIndex::new();
        grid.initialize(5.0, std::iter::empty(), &suite).unwrap();

        let mut agent = spatial(1.0, 1.0);
        suite.agent_added.fire(&agent).unwrap();
        assert_eq!(grid.inhabitants(DVec2::ZERO).unwrap(), vec![agent.id()]);

        agent.mark_added(&suite.agent_moved);
        agent.set_position(DVec2::new(12.0, 1.0)).unwrap();
        assert!(grid.inhabitants(DVec2::ZERO).unwrap().is_empty());
        assert_eq!(grid.inhabitants(DVec2::new(10.0, 0.0)).unwrap(), vec![agent.id()]);
        assert_eq!(grid.cell_count().unwrap(), 1);

        agent.mark_removed();
        suite.agent_removed.fire(&agent).unwrap();
        assert_eq!(grid.cell_count().unwrap(), 0);
        assert_eq!(grid.agent_cell(agent.id()).unwrap(), None);
    }

    #[test]
    fn test_abstract_agents_ignored() {
        let suite = CallbackSuite::new();
        let grid = GridIndex::new();
        grid.initialize(1.0, std::iter::empty(), &suite).unwrap();

        suite.agent_added.fire(&Agent::new()).unwrap();
        assert_eq!(grid.cell_count().unwrap(), 0);
    }

    #[test]
    fn test_reinitialize_rebuilds_without_double_subscription() {
        let suite = CallbackSuite::new();
        let a = spatial(3.0, 3.0);
        let grid = GridIndex::new();
        grid.initialize(5.0, [&a], &suite).unwrap();
        grid.initialize(1.0, [&a], &suite).unwrap();

        assert_eq!(suite.agent_added.len(), 1);
        assert_eq!(grid.grid_size(), Some(1.0));
        assert_eq!(grid.cell_of(DVec2::new(3.5, 3.5)).unwrap(), DVec2::new(3.0, 3.0));
        assert_eq!(grid.inhabitants(DVec2::new(3.0, 3.0)).unwrap(), vec![a.id()]);
    }
}
