//! Binary set operators. N-ary set operations compile into a left-deep chain
//! of these.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{close_all, drain, CursorState, Enumerator, MaterializeEnumerator};
use crate::error::{Error, Result};
use crate::plan::SetOpKind;
use crate::value::{Row, RowKey};

/// Left rows, then right rows.
pub struct ConcatEnumerator {
    children: [Box<dyn Enumerator>; 2],
    side: usize,
    state: CursorState,
}

impl ConcatEnumerator {
    /// Concatenation of `left` and `right`.
    pub fn new(left: Box<dyn Enumerator>, right: Box<dyn Enumerator>) -> Self {
        Self {
            children: [left, right],
            side: 0,
            state: CursorState::Unstarted,
        }
    }
}

impl Enumerator for ConcatEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        for child in &mut self.children {
            child.reset()?;
        }
        self.side = 0;
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        let mut found = false;
        while self.side < self.children.len() {
            if self.children[self.side].move_next()? {
                found = true;
                break;
            }
            self.side += 1;
        }
        self.state = CursorState::advanced(found);
        Ok(found)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        self.children
            .get(self.side)
            .ok_or_else(|| Error::contract("concat cursor past both inputs"))?
            .current()
    }

    fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        close_all(&mut self.children)
    }
}

/// Skips rows equal (under the total value order) to one already emitted.
pub struct DistinctEnumerator {
    input: Box<dyn Enumerator>,
    seen: FxHashSet<RowKey>,
    row: Option<Row>,
    state: CursorState,
}

impl DistinctEnumerator {
    /// Duplicate-eliminating wrapper of `input`.
    pub fn new(input: Box<dyn Enumerator>) -> Self {
        Self {
            input,
            seen: FxHashSet::default(),
            row: None,
            state: CursorState::Unstarted,
        }
    }
}

impl Enumerator for DistinctEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        self.input.reset()?;
        self.seen.clear();
        self.row = None;
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        self.row = None;
        while self.input.move_next()? {
            let row = self.input.current()?;
            if self.seen.insert(RowKey(row.clone())) {
                self.row = Some(row);
                break;
            }
        }
        self.state = CursorState::advanced(self.row.is_some());
        Ok(self.row.is_some())
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        self.row
            .clone()
            .ok_or_else(|| Error::contract("distinct cursor without a row"))
    }

    fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        self.seen.clear();
        self.input.close()
    }
}

/// Multiset of rows with their multiplicities.
fn counts(rows: Vec<Row>) -> FxHashMap<RowKey, usize> {
    let mut counts = FxHashMap::default();
    for row in rows {
        *counts.entry(RowKey(row)).or_insert(0) += 1;
    }
    counts
}

/// Rows of `left` kept or dropped by their presence in `right`, in left
/// order. With `all`, each right occurrence matches one left occurrence;
/// otherwise the output is duplicate-free.
fn intersect_or_minus(kind: SetOpKind, all: bool, left: Vec<Row>, right: Vec<Row>) -> Vec<Row> {
    let intersect = kind == SetOpKind::Intersect;
    let mut remaining = counts(right);
    let mut emitted = FxHashSet::default();
    let mut out = Vec::new();
    for row in left {
        let key = RowKey(row);
        let available = remaining.get_mut(&key);
        let keep = match (all, intersect, available) {
            (true, true, Some(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            (true, true, _) => false,
            (true, false, Some(n)) if *n > 0 => {
                *n -= 1;
                false
            }
            (true, false, _) => true,
            (false, true, available) => available.is_some() && emitted.insert(key.clone()),
            (false, false, available) => available.is_none() && emitted.insert(key.clone()),
        };
        if keep {
            out.push(key.0);
        }
    }
    out
}

/// Binary combination of two compiled inputs.
pub fn combine(
    kind: SetOpKind,
    all: bool,
    left: Box<dyn Enumerator>,
    right: Box<dyn Enumerator>,
) -> Box<dyn Enumerator> {
    match (kind, all) {
        (SetOpKind::Union, true) => Box::new(ConcatEnumerator::new(left, right)),
        (SetOpKind::Union, false) => {
            Box::new(DistinctEnumerator::new(Box::new(ConcatEnumerator::new(left, right))))
        }
        (kind, all) => Box::new(MaterializeEnumerator::new(
            kind.name(),
            vec![left, right],
            move |children| {
                let [left, right] = children else {
                    return Err(Error::contract("set operation needs two inputs"));
                };
                let left = drain(left.as_mut())?;
                let right = drain(right.as_mut())?;
                Ok(intersect_or_minus(kind, all, left, right))
            },
        )),
    }
}
