use super::go;

/// 8 boards x (own, opponent) + side to move.
pub const FEATURE_PLANES : usize = go::MAX_HISTORY * 2 + 1;

/// `[N, N, FEATURE_PLANES]` row major, planes innermost.
///
/// Stones are relative to the side to move. Boards older than the recorded
/// history are left empty.
pub fn extract_features(pos : &go::Position) -> Vec<f32> {
    let n = pos.n;
    let mut v = vec![0.0f32 ; n * n * FEATURE_PLANES];
    for back in 0..go::MAX_HISTORY {
        let Some(board) = pos.board(back) else {break;};
        for (i, stone) in board.iter().enumerate() {
            if *stone == go::EMPTY {continue;}
            let plane = if *stone == pos.to_play {back * 2} else {back * 2 + 1};
            v[i * FEATURE_PLANES + plane] = 1.0;
        }
    }
    if pos.to_play == go::BLACK {
        for i in 0..n * n {
            v[i * FEATURE_PLANES + FEATURE_PLANES - 1] = 1.0;
        }
    }
    v
}

#[test]
fn test_extract_features() {
    let mut pos = go::Position::new(5);
    let v = extract_features(&pos);
    assert_eq!(v.len(), 5 * 5 * FEATURE_PLANES);
    // black to play, nothing on the board
    assert_eq!(v.iter().sum::<f32>(), 25.0);

    pos.place(1, 2); // black
    let v = extract_features(&pos);
    let at = |r : usize, c : usize, p : usize| v[(r * 5 + c) * FEATURE_PLANES + p];
    // white to move: the black stone is the opponent's
    assert_eq!(at(1, 2, 0), 0.0);
    assert_eq!(at(1, 2, 1), 1.0);
    // one move ago the board was empty
    assert_eq!(at(1, 2, 3), 0.0);
    assert_eq!(at(0, 0, FEATURE_PLANES - 1), 0.0);

    pos.place(3, 3); // white
    let v = extract_features(&pos);
    let at = |r : usize, c : usize, p : usize| v[(r * 5 + c) * FEATURE_PLANES + p];
    assert_eq!(at(1, 2, 0), 1.0);
    assert_eq!(at(3, 3, 1), 1.0);
    assert_eq!(at(1, 2, 2), 1.0);
    assert_eq!(at(3, 3, 3), 0.0);
    assert_eq!(at(4, 4, FEATURE_PLANES - 1), 1.0);
}
