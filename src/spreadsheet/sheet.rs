use crate::spreadsheet::cell::Cell;

/// One worksheet held in memory: cells sorted by position plus an index of row spans.
#[derive(Debug, Default)]
pub struct Sheet {
    pub(crate) name: String,
    pub(crate) cells: Vec<Cell>,
    /// (row, lower cell index, upper cell index) for every physical row
    rows: Vec<(usize, usize, usize)>,
    sorted: bool,
}

/// Borrowed view of one physical row.
#[derive(Copy, Clone, Debug)]
pub struct Row<'a> {
    index: usize,
    cells: &'a [Cell],
}

impl Sheet {
    pub(crate) fn new(name: &str) -> Sheet {
        Sheet {
            name: name.to_owned(),
            cells: Vec::new(),
            rows: Vec::new(),
            sorted: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Adds a cell. Cells normally arrive in row-major order; anything else is
    /// reordered by [`Sheet::finish`].
    pub(crate) fn push(&mut self, cell: Cell) {
        if let Some(last) = self.cells.last() {
            if (last.row, last.col) >= (cell.row, cell.col) {
                self.sorted = false;
            }
        }
        self.cells.push(cell);
    }

    /// Sorts the cells, keeps the last cell written to any position and builds the
    /// row index.
    pub(crate) fn finish(&mut self) {
        if !self.sorted {
            self.cells.sort_by_key(|cell| (cell.row, cell.col));
            let mut deduplicated: Vec<Cell> = Vec::with_capacity(self.cells.len());
            for cell in self.cells.drain(..) {
                match deduplicated.last_mut() {
                    Some(last) if (last.row, last.col) == (cell.row, cell.col) => *last = cell,
                    _ => deduplicated.push(cell),
                }
            }
            self.cells = deduplicated;
            self.sorted = true;
        }

        self.rows.clear();
        let mut lower = 0usize;
        for index in 1..=self.cells.len() {
            if index == self.cells.len() || self.cells[index].row != self.cells[lower].row {
                self.rows.push((self.cells[lower].row, lower, index));
                lower = index;
            }
        }
    }

    /// Index of the first physical row
    pub fn first_row(&self) -> Option<usize> {
        self.rows.first().map(|(row, _, _)| *row)
    }

    /// Index of the last physical row
    pub fn last_row(&self) -> Option<usize> {
        self.rows.last().map(|(row, _, _)| *row)
    }

    /// Number of physical rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Looks up a physical row by its zero-based index
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows
            .binary_search_by_key(&index, |(row, _, _)| *row)
            .ok()
            .map(|position| self.row_at(position))
    }

    /// Physical rows with an index in `lower..=upper`, ascending
    pub fn rows_between(&self, lower: usize, upper: usize) -> impl Iterator<Item = Row<'_>> + '_ {
        let start = self.rows.partition_point(|(row, _, _)| *row < lower);
        let end = self.rows.partition_point(|(row, _, _)| *row <= upper);
        (start..end.max(start)).map(move |position| self.row_at(position))
    }

    fn row_at(&self, position: usize) -> Row<'_> {
        let (index, lower, upper) = self.rows[position];
        Row {
            index,
            cells: &self.cells[lower..upper],
        }
    }
}

impl<'a> Row<'a> {
    /// Zero-based row index
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }

    /// The cell in column `col`, if one is stored
    pub fn get(&self, col: usize) -> Option<&'a Cell> {
        self.cells
            .binary_search_by_key(&col, |cell| cell.col)
            .ok()
            .map(|position| &self.cells[position])
    }

    /// One past the highest stored column index
    pub fn last_cell_num(&self) -> usize {
        self.cells.last().map(|cell| cell.col + 1).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::cell::CellType;

    fn push(sheet: &mut Sheet, row: usize, col: usize) {
        sheet.push(Cell::new(row, col, CellType::Number, format!("{row}{col}")));
    }

    #[test]
    fn sheet_row_index() {
        let mut sheet = Sheet::new("Data");
        push(&mut sheet, 1, 1);
        push(&mut sheet, 1, 3);
        push(&mut sheet, 3, 0);
        push(&mut sheet, 3, 3);
        sheet.finish();

        assert_eq!(sheet.first_row(), Some(1));
        assert_eq!(sheet.last_row(), Some(3));
        assert_eq!(sheet.row_count(), 2);
        assert!(sheet.row(2).is_none());

        let row = sheet.row(1).unwrap();
        assert_eq!(row.cells().len(), 2);
        assert_eq!(row.get(3).unwrap().value(), "13");
        assert!(row.get(2).is_none());
        assert_eq!(row.last_cell_num(), 4);
    }

    #[test]
    fn sheet_sorts_out_of_order_cells() {
        let mut sheet = Sheet::new("Data");
        push(&mut sheet, 2, 0);
        push(&mut sheet, 0, 1);
        push(&mut sheet, 0, 0);
        sheet.push(Cell::new(2, 0, CellType::Text, "last"));
        sheet.finish();

        let positions: Vec<_> = sheet.cells.iter().map(|cell| (cell.row, cell.col)).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (2, 0)]);
        assert_eq!(sheet.row(2).unwrap().get(0).unwrap().value(), "last");
    }

    #[test]
    fn sheet_rows_between() {
        let mut sheet = Sheet::new("Data");
        for row in [0, 2, 4, 6] {
            push(&mut sheet, row, 0);
        }
        sheet.finish();

        let rows: Vec<_> = sheet.rows_between(1, 4).map(|row| row.index()).collect();
        assert_eq!(rows, vec![2, 4]);
        assert_eq!(sheet.rows_between(7, 9).count(), 0);
        assert_eq!(sheet.rows_between(5, 1).count(), 0);
    }

    #[test]
    fn empty_sheet() {
        let mut sheet = Sheet::new("Empty");
        sheet.finish();
        assert!(sheet.is_empty());
        assert_eq!(sheet.first_row(), None);
        assert_eq!(sheet.last_row(), None);
    }
}
