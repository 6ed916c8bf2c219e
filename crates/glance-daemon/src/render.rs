//! TrackState → display cards.
//!
//! `render` is a pure function of state and preferences; `present` is the
//! only place that touches the surface, and it never gives up half way.

use glance_proto::config::DisplayPreferences;
use glance_proto::protocol::{Card, DisplayMode, TrackState};
use tracing::warn;

use crate::surface::DisplaySurface;

pub const NOW_PLAYING_TITLE: &str = "Now Playing on Spotify";
pub const NOTHING_PLAYING: &str = "No music currently playing";

pub fn render(state: &TrackState, prefs: &DisplayPreferences) -> Vec<Card> {
    let mut cards = vec![primary_card(state, prefs.display_mode)];

    if prefs.show_album_art {
        if let Some(art) = &state.artwork {
            cards.push(Card::Image(art.clone()));
        }
    }

    if prefs.show_controls {
        cards.push(help_card());
    }

    cards
}

fn primary_card(state: &TrackState, mode: DisplayMode) -> Card {
    let title = NOW_PLAYING_TITLE.to_string();
    let status = state.status_label();
    let (track, artist, album) = (&state.title, &state.artist, &state.album);

    match mode {
        DisplayMode::Reference => Card::Reference {
            title,
            body: format!("{track}\nby {artist}\non {album}"),
        },
        DisplayMode::Bullets => Card::Bullets {
            title,
            items: vec![
                format!("Track: {track}"),
                format!("Artist: {artist}"),
                format!("Album: {album}"),
                status.to_string(),
            ],
        },
        DisplayMode::Rows => Card::Rows {
            rows: vec![
                format!("🎵 {track}"),
                format!("👤 {artist}"),
                format!("💿 {album}"),
                status.to_string(),
            ],
        },
        DisplayMode::Double => Card::Double {
            top: format!("{title}\n{status}"),
            bottom: format!("Track: {track}\nArtist: {artist}\nAlbum: {album}"),
        },
        DisplayMode::Wall => Card::TextWall {
            text: format!(
                "{title}\n\nTrack: {track}\nArtist: {artist}\nAlbum: {album}\n\n{status}"
            ),
        },
    }
}

/// Voice command cheat sheet.
pub fn help_card() -> Card {
    Card::Rows {
        rows: vec![
            "📢 Say 'previous track' to go back".to_string(),
            "📢 Say 'pause music' to pause".to_string(),
            "📢 Say 'play music' to play".to_string(),
            "📢 Say 'next track' to skip".to_string(),
        ],
    }
}

pub fn nothing_playing() -> Card {
    Card::notice(NOTHING_PLAYING)
}

/// Send cards in order. Returns how many the surface accepted.
pub fn present(cards: &[Card], surface: &dyn DisplaySurface) -> usize {
    cards
        .iter()
        .filter(|card| match surface.show(card) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to display {} card: {}", card.kind(), e);
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SurfaceError;
    use glance_proto::protocol::Artwork;
    use std::sync::{Arc, Mutex};

    fn prefs(mode: DisplayMode, show_controls: bool, show_album_art: bool) -> DisplayPreferences {
        DisplayPreferences {
            display_mode: mode,
            show_controls,
            show_album_art,
            ..Default::default()
        }
    }

    fn playing() -> TrackState {
        TrackState {
            rev: 3,
            track_id: "A".into(),
            title: "Song1".into(),
            artist: "Art1".into(),
            album: "Alb1".into(),
            is_playing: true,
            artwork: None,
        }
    }

    fn artwork() -> Artwork {
        Artwork {
            url: "u1".into(),
            width: 1,
            height: 1,
            rgba: Arc::new(vec![1, 2, 3, 4]),
        }
    }

    #[test]
    fn reference_layout() {
        let cards = render(&playing(), &prefs(DisplayMode::Reference, false, true));
        assert_eq!(
            cards,
            vec![Card::Reference {
                title: NOW_PLAYING_TITLE.into(),
                body: "Song1\nby Art1\non Alb1".into(),
            }]
        );
    }

    #[test]
    fn bullets_layout_ends_with_status() {
        let mut state = playing();
        state.is_playing = false;
        let cards = render(&state, &prefs(DisplayMode::Bullets, false, false));
        let Card::Bullets { items, .. } = &cards[0] else {
            panic!("expected bullets, got {:?}", cards[0]);
        };
        assert_eq!(items[0], "Track: Song1");
        assert_eq!(items[1], "Artist: Art1");
        assert_eq!(items[2], "Album: Alb1");
        assert_eq!(items[3], "⏸️ Paused");
    }

    #[test]
    fn rows_and_double_layouts() {
        let rows = render(&playing(), &prefs(DisplayMode::Rows, false, false));
        assert_eq!(
            rows[0],
            Card::Rows {
                rows: vec![
                    "🎵 Song1".into(),
                    "👤 Art1".into(),
                    "💿 Alb1".into(),
                    "▶️ Playing".into()
                ]
            }
        );

        let double = render(&playing(), &prefs(DisplayMode::Double, false, false));
        assert_eq!(
            double[0],
            Card::Double {
                top: format!("{NOW_PLAYING_TITLE}\n▶️ Playing"),
                bottom: "Track: Song1\nArtist: Art1\nAlbum: Alb1".into(),
            }
        );
    }

    #[test]
    fn wall_layout_contains_every_field() {
        let cards = render(&playing(), &prefs(DisplayMode::Wall, false, false));
        let Card::TextWall { text } = &cards[0] else {
            panic!("expected text wall");
        };
        for needle in [NOW_PLAYING_TITLE, "Track: Song1", "Artist: Art1", "Album: Alb1", "▶️ Playing"] {
            assert!(text.contains(needle), "missing {needle:?} in {text:?}");
        }
    }

    #[test]
    fn unknown_configured_mode_renders_as_wall() {
        let config = glance_proto::config::Config::parse_or_default(
            "[display]\ndisplay_mode = \"fancy\"\nshow_controls = false\nshow_album_art = false\n",
        );
        let cards = render(&playing(), &config.display_preferences());
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].kind(), "wall");
    }

    #[test]
    fn artwork_and_controls_follow_primary_card() {
        let mut state = playing();
        state.artwork = Some(artwork());

        let cards = render(&state, &prefs(DisplayMode::Rows, true, true));
        assert_eq!(cards.len(), 3);
        assert_eq!(cards[1], Card::Image(artwork()));
        assert_eq!(cards[2], help_card());

        let no_art = render(&state, &prefs(DisplayMode::Rows, true, false));
        assert_eq!(no_art.len(), 2);
        assert_eq!(no_art[1], help_card());
    }

    #[test]
    fn rendering_is_idempotent() {
        let mut state = playing();
        state.artwork = Some(artwork());
        for mode in [
            DisplayMode::Reference,
            DisplayMode::Bullets,
            DisplayMode::Rows,
            DisplayMode::Double,
            DisplayMode::Wall,
        ] {
            let p = prefs(mode, true, true);
            assert_eq!(render(&state, &p), render(&state, &p));
        }
    }

    #[test]
    fn empty_state_renders_without_panicking() {
        let cards = render(&TrackState::default(), &prefs(DisplayMode::Reference, true, true));
        assert_eq!(cards.len(), 2);
        assert_eq!(
            cards[0],
            Card::Reference {
                title: NOW_PLAYING_TITLE.into(),
                body: "\nby \non ".into(),
            }
        );
    }

    #[test]
    fn help_card_lists_four_commands() {
        let Card::Rows { rows } = help_card() else {
            panic!("help card should be rows");
        };
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().any(|r| r.contains("next track")));
    }

    /// Rejects images, accepts everything else.
    struct PickySurface {
        shown: Mutex<Vec<&'static str>>,
    }

    impl DisplaySurface for PickySurface {
        fn show(&self, card: &Card) -> Result<(), SurfaceError> {
            if matches!(card, Card::Image(_)) {
                return Err(SurfaceError::Rejected {
                    kind: card.kind(),
                    reason: "no bitmap support".into(),
                });
            }
            self.shown.lock().unwrap().push(card.kind());
            Ok(())
        }
    }

    #[test]
    fn present_continues_after_a_failed_card() {
        let mut state = playing();
        state.artwork = Some(artwork());
        let cards = render(&state, &prefs(DisplayMode::Reference, true, true));

        let surface = PickySurface {
            shown: Mutex::new(Vec::new()),
        };
        assert_eq!(present(&cards, &surface), 2);
        assert_eq!(*surface.shown.lock().unwrap(), vec!["reference", "rows"]);
    }
}
