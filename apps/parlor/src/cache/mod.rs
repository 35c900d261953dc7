//! Last-known attributes of remote participants and board tiles, keyed
//! by the numbers the server assigns. Entries are created lazily on
//! first reference and never removed, so late events about a
//! disconnected player still land somewhere.

use std::collections::HashMap;

use parlor_proto::TileUpdate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub name: String,
    pub typing: bool,
    pub connected: bool,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            name: String::new(),
            typing: false,
            connected: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// Tenths of a board unit, matching the wire encoding.
    pub x: i32,
    pub y: i32,
    /// One-way latch: a revealed tile never turns back down.
    pub facing_up: bool,
    pub letter: Option<char>,
}

/// What a tile record changed, so the renderer knows whether to animate
/// a move or reveal a letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDelta {
    pub moved: bool,
    pub revealed: bool,
}

#[derive(Debug, Default)]
pub struct BoardCache {
    players: HashMap<u32, Player>,
    tiles: HashMap<u32, Tile>,
}

impl BoardCache {
    pub fn player(&self, num: u32) -> Option<&Player> {
        self.players.get(&num)
    }

    pub fn players(&self) -> impl Iterator<Item = (u32, &Player)> {
        self.players.iter().map(|(num, player)| (*num, player))
    }

    pub fn tile(&self, num: u32) -> Option<&Tile> {
        self.tiles.get(&num)
    }

    pub fn tiles(&self) -> impl Iterator<Item = (u32, &Tile)> {
        self.tiles.iter().map(|(num, tile)| (*num, tile))
    }

    pub(crate) fn player_entry(&mut self, num: u32) -> &mut Player {
        self.players.entry(num).or_default()
    }

    pub(crate) fn set_player_name(&mut self, num: u32, name: String) -> Player {
        let player = self.player_entry(num);
        player.name = name;
        player.clone()
    }

    pub(crate) fn set_player_flags(&mut self, num: u32, typing: bool, connected: bool) -> Player {
        let player = self.player_entry(num);
        player.typing = typing;
        player.connected = connected;
        player.clone()
    }

    /// Applies a tile record. A newly seen tile is placed without
    /// counting as a move; afterwards any coordinate change does. The
    /// letter is captured at reveal time and the face-up latch holds
    /// even if a later record claims otherwise.
    pub(crate) fn apply_tile(&mut self, update: &TileUpdate) -> (Tile, TileDelta) {
        let mut delta = TileDelta {
            moved: false,
            revealed: false,
        };
        let tile = self
            .tiles
            .entry(update.num)
            .and_modify(|tile| {
                delta.moved = tile.x != update.x || tile.y != update.y;
                tile.x = update.x;
                tile.y = update.y;
            })
            .or_insert_with(|| Tile {
                x: update.x,
                y: update.y,
                facing_up: false,
                letter: None,
            });
        if update.facing_up && !tile.facing_up {
            tile.facing_up = true;
            tile.letter = update.letter;
            delta.revealed = true;
        }
        (tile.clone(), delta)
    }
}
