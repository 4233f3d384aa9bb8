//! Filter, projection and unwind over a child enumerator.

use std::sync::Arc;

use super::{CursorState, Enumerator};
use crate::error::{Error, Result};
use crate::rex::ExprProgram;
use crate::value::{ParamSet, Row, Value};

/// Evaluates a program row by row: rows failing the condition are skipped
/// and projections are computed from the child's current row.
pub struct CalcEnumerator {
    input: Box<dyn Enumerator>,
    program: ExprProgram,
    params: Arc<ParamSet>,
    state: CursorState,
}

impl CalcEnumerator {
    /// Runs `program` over `input`.
    pub fn new(input: Box<dyn Enumerator>, program: ExprProgram, params: Arc<ParamSet>) -> Self {
        Self {
            input,
            program,
            params,
            state: CursorState::Unstarted,
        }
    }
}

impl Enumerator for CalcEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        self.input.reset()?;
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        let found = if self.program.condition().is_none() {
            self.input.move_next()?
        } else {
            loop {
                if !self.input.move_next()? {
                    break false;
                }
                if self.program.accepts(&self.input.current()?, &self.params)? {
                    break true;
                }
            }
        };
        self.state = CursorState::advanced(found);
        Ok(found)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        self.program.project_row(&self.input.current()?, &self.params)
    }

    fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        self.input.close()
    }
}

/// Program whose projection at `position` is multi-valued; each accepted
/// child row expands into one output row per array element, in order.
pub struct UnwindEnumerator {
    input: Box<dyn Enumerator>,
    program: ExprProgram,
    position: usize,
    params: Arc<ParamSet>,
    buffer: Vec<Row>,
    index: usize,
    state: CursorState,
}

impl UnwindEnumerator {
    /// Expands the projection at the program's unwind position.
    pub fn new(
        input: Box<dyn Enumerator>,
        program: ExprProgram,
        params: Arc<ParamSet>,
    ) -> Result<Self> {
        let position = program
            .unwind_position()
            .ok_or_else(|| Error::contract("unwind enumerator over a program without unwind"))?;
        Ok(Self {
            input,
            program,
            position,
            params,
            buffer: Vec::new(),
            index: 0,
            state: CursorState::Unstarted,
        })
    }

    /// Pulls child rows until one expands to at least one output row.
    fn refill(&mut self) -> Result<bool> {
        self.buffer.clear();
        self.index = 0;
        while self.buffer.is_empty() {
            if !self.input.move_next()? {
                return Ok(false);
            }
            let row = self.input.current()?;
            if !self.program.accepts(&row, &self.params)? {
                continue;
            }
            let projected = self.program.project_row(&row, &self.params)?;
            self.buffer = expand(projected, self.position)?;
        }
        Ok(true)
    }
}

fn expand(mut projected: Row, position: usize) -> Result<Vec<Row>> {
    let slot = projected
        .get_mut(position)
        .ok_or_else(|| Error::contract(format!("unwind position {position} out of range")))?;
    let items = match std::mem::replace(slot, Value::Null) {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(Error::eval(format!("unwind expects an array, got {other}"))),
    };
    Ok(items
        .into_iter()
        .map(|item| {
            let mut row = projected.clone();
            row[position] = item;
            row
        })
        .collect())
}

impl Enumerator for UnwindEnumerator {
    fn reset(&mut self) -> Result<()> {
        self.state.ensure_open("reset")?;
        self.input.reset()?;
        self.buffer.clear();
        self.index = 0;
        self.state = CursorState::Unstarted;
        Ok(())
    }

    fn move_next(&mut self) -> Result<bool> {
        self.state.ensure_open("move_next")?;
        if self.state == CursorState::Exhausted {
            return Ok(false);
        }
        if self.state == CursorState::Positioned {
            self.index += 1;
        }
        let found = self.index < self.buffer.len() || self.refill()?;
        self.state = CursorState::advanced(found);
        Ok(found)
    }

    fn current(&self) -> Result<Row> {
        self.state.ensure_positioned()?;
        self.buffer
            .get(self.index)
            .cloned()
            .ok_or_else(|| Error::contract("unwind cursor out of range"))
    }

    fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        self.buffer.clear();
        self.input.close()
    }
}
