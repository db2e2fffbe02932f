// Geniartor Music
//
// Composes short multi-voice phrases by Variable Neighborhood Search. The
// user fixes the structure (length, meter, scale, voices with their ranges
// and rhythm rules) and a weighting of musical criteria; the search explores
// pieces satisfying the structure and keeps the one with the highest
// weighted score.
//
// Architecture:
// - piece.rs: Core representation (notes, voices tiling one tick timeline)
// - scale.rs: Scale types, degrees, note-name parsing
// - rhythm.rs: Allowed durations and rhythmic patterns of a voice
// - sonority.rs: Vertical slices of a piece with metric position labels
// - scoring.rs: Named scoring functions and their registry
// - evaluation.rs: Weighted sum of scoring functions (the fitness)
// - config.rs: JSON configuration and constraint resolution
// - draft.rs: Random initial piece satisfying the constraints
// - neighborhood.rs: Elementary moves, shaking, order-1 move enumeration
// - vns.rs: VNS state machine, local search, parallel multi-start
// - midi.rs: MIDI file output from finished pieces
// - error.rs: Configuration and generation errors
//
// The search is deterministic given a seed.

pub mod config;
pub mod draft;
pub mod error;
pub mod evaluation;
pub mod midi;
pub mod neighborhood;
pub mod piece;
pub mod rhythm;
pub mod scale;
pub mod scoring;
pub mod sonority;
pub mod vns;
