use std::collections::VecDeque;

pub const BLACK : i8 = 1;
pub const WHITE : i8 = -1;
pub const EMPTY : i8 = 0;

/// how many previous boards a position remembers.
pub const MAX_HISTORY : usize = 8;

/// A board snapshot as seen by the network.
///
/// Legality, captures and scoring belong to the rules engine; this only keeps
/// the stones, the side to move and the recent boards that the feature planes
/// are built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub n : usize,
    pub stones : Vec<i8>,
    pub to_play : i8,
    /// previous boards, most recent first.
    pub recent : VecDeque<Vec<i8>>,
}

impl Position {
    pub fn new(n : usize) -> Position {
        Position {
            n,
            stones : vec![EMPTY ; n * n],
            to_play : BLACK,
            recent : VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    #[cfg(test)]
    pub fn at(&self, row : usize, col : usize) -> i8 {
        self.stones[row * self.n + col]
    }

    fn push_history(&mut self) {
        if self.recent.len() == MAX_HISTORY {
            self.recent.pop_back();
        }
        self.recent.push_front(self.stones.clone());
    }

    /// puts a stone of the side to move on (row, col) and passes the turn.
    pub fn place(&mut self, row : usize, col : usize) {
        self.push_history();
        self.stones[row * self.n + col] = self.to_play;
        self.to_play = -self.to_play;
    }

    pub fn pass(&mut self) {
        self.push_history();
        self.to_play = -self.to_play;
    }

    /// board `back` moves ago. 0 is the current board.
    pub fn board(&self, back : usize) -> Option<&[i8]> {
        if back == 0 {
            return Some(&self.stones);
        }
        self.recent.get(back - 1).map(|b| b.as_slice())
    }
}

#[test]
fn test_place_and_history() {
    let mut pos = Position::new(9);
    pos.place(2, 3);
    assert_eq!(pos.at(2, 3), BLACK);
    assert_eq!(pos.to_play, WHITE);
    pos.place(4, 4);
    assert_eq!(pos.at(4, 4), WHITE);
    assert_eq!(pos.to_play, BLACK);

    assert_eq!(pos.board(1).unwrap()[2 * 9 + 3], BLACK);
    assert_eq!(pos.board(1).unwrap()[4 * 9 + 4], EMPTY);
    assert!(pos.board(2).unwrap().iter().all(|s| *s == EMPTY));
    assert!(pos.board(3).is_none());

    for _ in 0..20 {pos.pass();}
    assert_eq!(pos.recent.len(), MAX_HISTORY);
}
