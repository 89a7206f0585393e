use crate::parser::music_parser::MusicParser;
use crate::parser::primitive_parser::{
    parse_bool, parse_byte, parse_byte_size_string, parse_int, parse_int_byte_sized_string,
    parse_int_sized_string, parse_signed_byte, skip,
};
use crate::parser::{decode_failure, GpError, GpErrorKind, PResult};
use crate::TabError;
use nom::combinator::map;
use nom::error::ErrorKind;
use nom::{IResult, Parser};

// GP3 docs at <https://dguitar.sourceforge.net/GP3format.html>
// GP4 docs at <https://dguitar.sourceforge.net/GP4format.html>

/// Base time unit: ticks per quarter note.
pub const QUARTER_TIME: i64 = 960;

/// The channel table always holds 4 MIDI ports of 16 channels each.
pub const MIDI_CHANNEL_COUNT: usize = 64;

/// Channel 9 of each port is reserved for percussion.
pub const DEFAULT_PERCUSSION_CHANNEL: u8 = 9;

/// The lyrics block carries a fixed number of lines.
pub const MAX_LYRIC_LINES: usize = 5;

/// A track never encodes more than 7 tuning slots.
pub const TRACK_MAX_STRINGS: usize = 7;

pub const DURATION_QUARTER: u16 = 4;
pub const DURATION_EIGHTH: u16 = 8;
pub const DURATION_SIXTEENTH: u16 = 16;
pub const DURATION_THIRTY_SECOND: u16 = 32;
pub const DURATION_SIXTY_FOURTH: u16 = 64;
pub const DURATION_HUNDRED_TWENTY_EIGHTH: u16 = 128;

/// Version header of the file, e.g. `FICHIER GUITAR PRO v3.00`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpVersion {
    pub raw: String,
    /// Major component of the version, e.g. `v4`
    pub major: String,
    /// Minor component of the version, e.g. `06`
    pub minor: String,
}

impl GpVersion {
    /// Map the major version to a supported format generation.
    ///
    /// The match is case-sensitive like the original parser table; an
    /// unknown major version means "no decoder", not an error.
    pub fn generation(&self) -> Option<GpGeneration> {
        match self.major.as_str() {
            "v3" => Some(GpGeneration::Gp3),
            "v4" => Some(GpGeneration::Gp4),
            _ => None,
        }
    }
}

/// The two binary layout generations this crate decodes.
///
/// All shared decoding routines take the generation as an explicit
/// parameter and dispatch the four divergence points (chord diagram,
/// beat effect, note effect, mix table flags) on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GpGeneration {
    Gp3,
    Gp4,
}

/// Parse the version string from the file header.
///
/// 30 character string (not counting the byte announcing the real length
/// of the string).
pub fn parse_gp_version(i: &[u8]) -> PResult<'_, GpVersion> {
    log::debug!("Parsing GP version");
    let (i, raw) = parse_byte_size_string(30)(i)?;
    let (major, minor) = extract_version_numbers(&raw).unwrap_or_default();
    Ok((i, GpVersion { raw, major, minor }))
}

/// Scan for the `(v[0-9]).([0-9]+)` pattern in the raw version string.
fn extract_version_numbers(raw: &str) -> Option<(String, String)> {
    let bytes = raw.as_bytes();
    for pos in 0..bytes.len() {
        if bytes[pos] != b'v' && bytes[pos] != b'V' {
            continue;
        }
        if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) {
            continue;
        }
        // one separator character, then the minor digits
        let rest = bytes.get(pos + 3..)?;
        let digit_count = rest.iter().take_while(|b| b.is_ascii_digit()).count();
        if digit_count == 0 {
            continue;
        }
        let major = String::from_utf8_lossy(&bytes[pos..pos + 2]).into_owned();
        let minor = String::from_utf8_lossy(&rest[..digit_count]).into_owned();
        return Some((major, minor));
    }
    None
}

#[derive(Debug, PartialEq, Default)]
pub struct Song {
    pub version: GpVersion,
    pub clipboard: Option<Clipboard>,
    pub song_info: SongInfo,
    pub triplet_feel: TripletFeel,
    pub lyrics: Option<Lyrics>, // only GP4
    pub tempo: i32,
    pub key_signature: KeySignature,
    pub midi_channels: Vec<MidiChannel>,
    pub repeat_groups: Vec<RepeatGroup>,
    pub measure_headers: Vec<MeasureHeader>,
    pub tracks: Vec<Track>,
    pub master_effect: MasterEffect,
}

/// Selection bounds found in clipboard files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clipboard {
    pub start_measure: i32,
    pub stop_measure: i32,
    pub start_track: i32,
    pub stop_track: i32,
}

#[derive(Debug, PartialEq, Eq, Default)]
pub struct SongInfo {
    pub title: String,
    pub subtitle: String,
    pub artist: String,
    pub album: String,
    pub words: String,
    /// Neither generation encodes the composer separately, it mirrors `words`
    pub music: String,
    pub copyright: String,
    pub tab: String,
    pub instructions: String,
    pub notices: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Lyrics {
    pub track_choice: i32,
    pub lines: Vec<LyricLine>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LyricLine {
    pub start_measure: i32,
    pub text: String,
}

/// Master audio effect block, zero-initialized by both generations.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct MasterEffect {
    pub volume: i32,
    pub reverb: i32,
    pub equalizer: Equalizer,
}

#[derive(Debug, PartialEq, Eq, Default)]
pub struct Equalizer {
    pub knobs: Vec<i32>,
    pub gain: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TripletFeel {
    #[default]
    None,
    Eighth,
    Sixteenth,
}

pub const KEY_SIGNATURES: [&str; 34] = [
    "F♭ major",
    "C♭ major",
    "G♭ major",
    "D♭ major",
    "A♭ major",
    "E♭ major",
    "B♭ major",
    "F major",
    "C major",
    "G major",
    "D major",
    "A major",
    "E major",
    "B major",
    "F# major",
    "C# major",
    "G# major",
    "D♭ minor",
    "A♭ minor",
    "E♭ minor",
    "B♭ minor",
    "F minor",
    "C minor",
    "G minor",
    "D minor",
    "A minor",
    "E minor",
    "B minor",
    "F# minor",
    "C# minor",
    "G# minor",
    "D# minor",
    "A# minor",
    "E# minor",
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct KeySignature {
    pub root: i8,
    pub is_minor: bool,
}

impl KeySignature {
    pub const fn new(root: i8, is_minor: bool) -> Self {
        KeySignature { root, is_minor }
    }
}

impl std::fmt::Display for KeySignature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let index = if self.is_minor {
            23 + i32::from(self.root)
        } else {
            8 + i32::from(self.root)
        };
        let name = usize::try_from(index)
            .ok()
            .and_then(|index| KEY_SIGNATURES.get(index));
        match name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "unknown key ({})", self.root),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiChannel {
    pub channel_id: u8,
    pub effect_channel_id: u8,
    pub instrument: i32,
    pub volume: i16,
    pub balance: i16,
    pub chorus: i16,
    pub reverb: i16,
    pub phaser: i16,
    pub tremolo: i16,
}

impl MidiChannel {
    pub const fn is_percussion(&self) -> bool {
        self.channel_id % 16 == DEFAULT_PERCUSSION_CHANNEL
    }
}

/// Expand a channel parameter byte to the wider scale used by the model.
pub fn to_channel_value(value: i8) -> i16 {
    let expanded = ((i32::from(value) << 3) - 1).clamp(-32768, 32767);
    (expanded.max(-1) + 1) as i16
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub unused: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub title: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuplet {
    pub enters: u8,
    pub times: u8,
}

impl Default for Tuplet {
    fn default() -> Self {
        Tuplet {
            enters: 1,
            times: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duration {
    pub value: u16,
    pub is_dotted: bool,
    pub tuplet: Tuplet,
}

impl Default for Duration {
    fn default() -> Self {
        Duration {
            value: DURATION_QUARTER,
            is_dotted: false,
            tuplet: Tuplet::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: i8,
    pub denominator: Duration,
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature {
            numerator: 4,
            denominator: Duration::default(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct MeasureHeader {
    /// Raw flag byte driving the optional fields
    pub flag: u8,
    /// 1-based measure index
    pub index: usize,
    /// Absolute start time, back-filled while decoding measures
    pub start_time: i64,
    pub time_signature: TimeSignature,
    pub key_signature: KeySignature,
    pub marker: Option<Marker>,
    pub repeat_begin: bool,
    pub repeat_end: i8,
    /// Bitmask of the alternate-ending passes this measure plays on
    pub repeat_alternative: i32,
    pub triplet_feel: TripletFeel,
    pub has_double_bar: bool,
}

impl Default for MeasureHeader {
    fn default() -> Self {
        MeasureHeader {
            flag: 0,
            index: 0,
            start_time: QUARTER_TIME,
            time_signature: TimeSignature::default(),
            key_signature: KeySignature::default(),
            marker: None,
            repeat_begin: false,
            repeat_end: 0,
            repeat_alternative: 0,
            triplet_feel: TripletFeel::None,
            has_double_bar: false,
        }
    }
}

/// A run of consecutive measures bounded by repeat markers.
///
/// Members are indices into `Song::measure_headers`, headers are never
/// duplicated into the group.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct RepeatGroup {
    pub measure_headers: Vec<usize>,
    pub openings: Vec<usize>,
    pub closings: Vec<usize>,
    pub is_closed: bool,
}

impl RepeatGroup {
    /// Append a measure header to the group.
    ///
    /// A group with no pending opening measure closes on the spot; this
    /// mirrors the reference grouping rule bit for bit, see the property
    /// test before changing anything here.
    pub fn add_measure_header(&mut self, header_index: usize) {
        self.measure_headers.push(header_index);
        if self.openings.is_empty() {
            self.is_closed = true;
            self.closings.push(header_index);
        } else if self.is_closed {
            self.is_closed = false;
            self.openings.push(header_index);
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Track {
    /// 0-based track index
    pub index: usize,
    /// Raw flag byte: 0x01 drums, 0x02 12-stringed guitar, 0x04 banjo
    pub flag: u8,
    pub name: String,
    pub string_count: i32,
    /// Strings ordered from highest to lowest, index 1..=N
    pub strings: Vec<GuitarString>,
    pub port: i32,
    /// Channel copied by value from the channel table; `None` when the
    /// stored table index is out of range
    pub channel: Option<MidiChannel>,
    pub fret_count: i32,
    /// Fret of the capo, 0 when unused
    pub offset: i32,
    pub color: Color,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuitarString {
    /// 1-based string number
    pub index: u8,
    pub tuning: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeasureClef {
    Treble,
    Bass,
    Tenor,
    Alto,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineBreak {
    None,
    Break,
    Protect,
}

#[derive(Debug, PartialEq)]
pub struct Measure {
    pub start_time: i64,
    pub clef: MeasureClef,
    pub line_break: LineBreak,
    pub voices: Vec<Voice>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum VoiceDirection {
    #[default]
    None,
    Up,
    Down,
}

#[derive(Debug, PartialEq, Default)]
pub struct Voice {
    pub direction: VoiceDirection,
    pub beats: Vec<Beat>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BeatStatus {
    Empty,
    #[default]
    Normal,
    Rest,
}

impl BeatStatus {
    pub const fn from_byte(value: u8) -> BeatStatus {
        match value {
            0 => BeatStatus::Empty,
            2 => BeatStatus::Rest,
            _ => BeatStatus::Normal,
        }
    }
}

#[derive(Debug, PartialEq, Default)]
pub struct Beat {
    pub notes: Vec<Note>,
    pub duration: Duration,
    pub status: BeatStatus,
    pub text: Option<String>,
    pub start: i64,
    pub effect: BeatEffect,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BeatStrokeDirection {
    #[default]
    None,
    Up,
    Down,
}

impl BeatStrokeDirection {
    pub const fn from_byte(value: u8) -> BeatStrokeDirection {
        match value {
            1 => BeatStrokeDirection::Up,
            2 => BeatStrokeDirection::Down,
            _ => BeatStrokeDirection::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeatStroke {
    pub direction: BeatStrokeDirection,
    pub value: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SlapEffect {
    #[default]
    None,
    Tapping,
    Slapping,
    Popping,
}

impl SlapEffect {
    pub const fn from_byte(value: u8) -> SlapEffect {
        match value {
            1 => SlapEffect::Tapping,
            2 => SlapEffect::Slapping,
            3 => SlapEffect::Popping,
            _ => SlapEffect::None,
        }
    }
}

#[derive(Debug, PartialEq, Default)]
pub struct BeatEffect {
    pub stroke: BeatStroke,
    pub pick_stroke: BeatStrokeDirection,
    pub chord: Option<Chord>,
    pub fade_in: bool,
    pub vibrato: bool,
    pub has_rasgueado: bool,
    pub slap: SlapEffect,
    pub tremolo_bar: Option<BendEffect>,
    pub harmonic: Option<HarmonicEffect>,
    pub mix_table_change: Option<MixTableChange>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Intonation {
    #[default]
    Sharp,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pitch {
    pub just: i32,
    pub intonation: Option<Intonation>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChordType {
    Major,
    Seventh,
    MajorSeventh,
    Sixth,
    Minor,
    MinorSeventh,
    MinorMajor,
    MinorSixth,
    SuspendedSecond,
    SuspendedFourth,
    SeventhSuspendedSecond,
    SeventhSuspendedFourth,
    Diminished,
    Augmented,
    Power,
}

impl ChordType {
    pub const fn from_value(value: i32) -> ChordType {
        match value {
            1 => ChordType::Seventh,
            2 => ChordType::MajorSeventh,
            3 => ChordType::Sixth,
            4 => ChordType::Minor,
            5 => ChordType::MinorSeventh,
            6 => ChordType::MinorMajor,
            7 => ChordType::MinorSixth,
            8 => ChordType::SuspendedSecond,
            9 => ChordType::SuspendedFourth,
            10 => ChordType::SeventhSuspendedSecond,
            11 => ChordType::SeventhSuspendedFourth,
            12 => ChordType::Diminished,
            13 => ChordType::Augmented,
            14 => ChordType::Power,
            _ => ChordType::Major,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChordAlteration {
    Perfect,
    Diminished,
    Augmented,
}

impl ChordAlteration {
    pub const fn from_value(value: i32) -> ChordAlteration {
        match value {
            1 => ChordAlteration::Diminished,
            2 => ChordAlteration::Augmented,
            _ => ChordAlteration::Perfect,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChordExtension {
    None,
    Ninth,
    Eleventh,
    Thirteenth,
}

impl ChordExtension {
    pub const fn from_value(value: i32) -> ChordExtension {
        match value {
            1 => ChordExtension::Ninth,
            2 => ChordExtension::Eleventh,
            3 => ChordExtension::Thirteenth,
            _ => ChordExtension::None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Fingering {
    #[default]
    Open,
    Thumb,
    Index,
    Middle,
    Annular,
    Little,
}

impl Fingering {
    pub const fn from_byte(value: i8) -> Fingering {
        match value {
            0 => Fingering::Thumb,
            1 => Fingering::Index,
            2 => Fingering::Middle,
            3 => Fingering::Annular,
            4 => Fingering::Little,
            _ => Fingering::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barre {
    pub fret: i32,
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, PartialEq, Eq, Default)]
pub struct Chord {
    /// Number of strings of the track the diagram belongs to
    pub length: usize,
    pub name: String,
    pub sharp: Option<bool>,
    pub root: Option<Pitch>,
    pub kind: Option<ChordType>,
    pub extension: Option<ChordExtension>,
    pub bass: Option<Pitch>,
    pub tonality: Option<ChordAlteration>,
    pub add: Option<bool>,
    pub fifth: Option<ChordAlteration>,
    pub ninth: Option<ChordAlteration>,
    pub eleventh: Option<ChordAlteration>,
    pub first_fret: i32,
    pub strings: Vec<i32>,
    pub barres: Vec<Barre>,
    pub omissions: Vec<bool>,
    pub fingerings: Vec<Fingering>,
    pub show: Option<bool>,
    pub new_format: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Octave {
    #[default]
    None,
    Ottava,
    Quindicesima,
    OttavaBassa,
    QuindicesimaBassa,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarmonicEffect {
    Natural,
    Artificial { pitch: Pitch, octave: Octave },
    Tapped,
    Pinch,
    Semi,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BendType {
    #[default]
    None,
    Bend,
    BendRelease,
    BendReleaseBend,
    PreBend,
    PreBendRelease,
    Dip,
    Dive,
    ReleaseUp,
    InvertedDip,
    Return,
    ReleaseDown,
}

impl BendType {
    pub const fn from_byte(value: i8) -> BendType {
        match value {
            1 => BendType::Bend,
            2 => BendType::BendRelease,
            3 => BendType::BendReleaseBend,
            4 => BendType::PreBend,
            5 => BendType::PreBendRelease,
            6 => BendType::Dip,
            7 => BendType::Dive,
            8 => BendType::ReleaseUp,
            9 => BendType::InvertedDip,
            10 => BendType::Return,
            11 => BendType::ReleaseDown,
            _ => BendType::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BendPoint {
    pub position: i32,
    pub value: i32,
    pub vibrato: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BendEffect {
    pub kind: BendType,
    pub value: i32,
    pub points: Vec<BendPoint>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum GraceEffectTransition {
    #[default]
    None,
    Slide,
    Bend,
    Hammer,
}

impl GraceEffectTransition {
    pub const fn from_byte(value: i8) -> GraceEffectTransition {
        match value {
            1 => GraceEffectTransition::Slide,
            2 => GraceEffectTransition::Bend,
            3 => GraceEffectTransition::Hammer,
            _ => GraceEffectTransition::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraceEffect {
    pub fret: i8,
    pub velocity: i8,
    pub duration: i32,
    pub is_dead: bool,
    pub transition: GraceEffectTransition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrillEffect {
    pub fret: i8,
    pub duration: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TremoloPickingEffect {
    pub duration: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SlideType {
    IntoFromAbove,
    IntoFromBelow,
    #[default]
    None,
    ShiftSlideTo,
    LegatoSlideTo,
    OutDownwards,
    OutUpwards,
}

impl SlideType {
    pub const fn from_byte(value: i8) -> SlideType {
        match value {
            -2 => SlideType::IntoFromAbove,
            -1 => SlideType::IntoFromBelow,
            1 => SlideType::ShiftSlideTo,
            2 => SlideType::LegatoSlideTo,
            3 => SlideType::OutDownwards,
            4 => SlideType::OutUpwards,
            _ => SlideType::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoteEffect {
    pub bend: Option<BendEffect>,
    pub grace: Option<GraceEffect>,
    pub slides: Vec<SlideType>,
    pub hammer: bool,
    pub let_ring: bool,
    pub staccato: bool,
    pub palm_mute: bool,
    pub vibrato: bool,
    pub harmonic: Option<HarmonicEffect>,
    pub tremolo_picking: Option<TremoloPickingEffect>,
    pub trill: Option<TrillEffect>,
    pub left_hand_finger: Fingering,
    pub right_hand_finger: Fingering,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NoteType {
    #[default]
    Rest,
    Normal,
    Tie,
    Dead,
    Unknown(u8),
}

impl NoteType {
    pub const fn from_byte(value: u8) -> NoteType {
        match value {
            0 => NoteType::Rest,
            1 => NoteType::Normal,
            2 => NoteType::Tie,
            3 => NoteType::Dead,
            value => NoteType::Unknown(value),
        }
    }
}

#[derive(Debug, PartialEq, Default)]
pub struct Note {
    /// Fret value, clamped to 0..=99 (resolved value for tied notes)
    pub value: i16,
    pub velocity: i16,
    /// 1-based string number the note sounds on
    pub string: u8,
    pub kind: NoteType,
    /// Time-independent duration byte, when present
    pub duration: Option<i8>,
    pub tuplet: Option<i8>,
    pub effect: Option<NoteEffect>,
}

pub fn parse_color(i: &[u8]) -> PResult<'_, Color> {
    log::debug!("Parsing RGB color");
    map(
        (parse_byte, parse_byte, parse_byte, parse_byte),
        |(r, g, b, unused)| Color { r, g, b, unused },
    )
    .parse(i)
}

pub fn parse_marker(i: &[u8]) -> PResult<'_, Marker> {
    log::debug!("Parsing marker");
    map(
        (parse_int_byte_sized_string, parse_color),
        |(title, color)| Marker { title, color },
    )
    .parse(i)
}

/// Read beat duration.
///
/// The duration byte maps to the note value as `1 << (byte + 2)`:
///
/// * *-2*: whole note
/// * *-1*: half note
/// * *0*: quarter note
/// * *1*: eighth note
/// * *2*: sixteenth note
/// * *3*: thirty-second note
///
/// When the n-tuplet flag is set the ratio follows as an integer; an
/// unrecognized ratio keeps the 1:1 default instead of failing.
pub fn parse_duration(
    is_dotted: bool,
    is_tuplet: bool,
) -> impl FnMut(&[u8]) -> IResult<&[u8], Duration, GpError> {
    move |i: &[u8]| {
        let (mut i, value_byte) = parse_signed_byte(i)?;
        let shift = i32::from(value_byte) + 2;
        let value = if (0..=15).contains(&shift) {
            1u16 << shift
        } else {
            DURATION_QUARTER
        };
        let mut duration = Duration {
            value,
            is_dotted,
            tuplet: Tuplet::default(),
        };
        if is_tuplet {
            let (inner, tuplet) = parse_int(i)?;
            i = inner;
            match tuplet {
                3 => {
                    duration.tuplet = Tuplet {
                        enters: 3,
                        times: 2,
                    };
                }
                enters @ 5..=7 => {
                    duration.tuplet = Tuplet {
                        enters: enters as u8,
                        times: 4,
                    };
                }
                enters @ 9..=13 => {
                    duration.tuplet = Tuplet {
                        enters: enters as u8,
                        times: 8,
                    };
                }
                unknown => log::debug!("Keeping 1:1 ratio for tuplet {unknown}"),
            }
        }
        log::debug!("Duration: {duration:?}");
        Ok((i, duration))
    }
}

const fn to_stroke_value(value: i8) -> u16 {
    match value {
        1 => DURATION_HUNDRED_TWENTY_EIGHTH,
        2 => DURATION_SIXTY_FOURTH,
        3 => DURATION_THIRTY_SECOND,
        4 => DURATION_SIXTEENTH,
        5 => DURATION_EIGHTH,
        6 => DURATION_QUARTER,
        _ => DURATION_SIXTY_FOURTH,
    }
}

pub fn parse_beat_stroke(i: &[u8]) -> PResult<'_, BeatStroke> {
    log::debug!("Parsing beat stroke");
    let (i, (up, down)) = (parse_signed_byte, parse_signed_byte).parse(i)?;
    let stroke = if up > 0 {
        BeatStroke {
            direction: BeatStrokeDirection::Up,
            value: to_stroke_value(up),
        }
    } else {
        BeatStroke {
            direction: BeatStrokeDirection::Down,
            value: to_stroke_value(down),
        }
    };
    Ok((i, stroke))
}

pub fn parse_bend(i: &[u8]) -> PResult<'_, BendEffect> {
    log::debug!("Parsing bend");
    let (i, kind) = parse_signed_byte(i)?;
    let (i, value) = parse_int(i)?;
    let (mut i, point_count) = parse_int(i)?;
    let mut bend = BendEffect {
        kind: BendType::from_byte(kind),
        value,
        points: vec![],
    };
    for _ in 0..point_count {
        let (inner, (position, value, vibrato)) = (parse_int, parse_int, parse_bool).parse(i)?;
        i = inner;
        bend.points.push(BendPoint {
            position,
            value,
            vibrato,
        });
    }
    Ok((i, bend))
}

pub fn parse_grace_effect(i: &[u8]) -> PResult<'_, GraceEffect> {
    log::debug!("Parsing grace effect");
    let (i, (fret, velocity, duration_byte, transition)) = (
        parse_signed_byte,
        parse_signed_byte,
        parse_signed_byte,
        parse_signed_byte,
    )
        .parse(i)?;
    let grace = GraceEffect {
        fret,
        velocity,
        duration: 1i32 << ((7 - i32::from(duration_byte)) & 31),
        is_dead: fret == -1,
        transition: GraceEffectTransition::from_byte(transition),
    };
    Ok((i, grace))
}

pub fn parse_trill_effect(i: &[u8]) -> PResult<'_, TrillEffect> {
    log::debug!("Parsing trill effect");
    let (i, (fret, period)) = (parse_signed_byte, parse_signed_byte).parse(i)?;
    let duration = match period {
        1 => DURATION_SIXTEENTH,
        2 => DURATION_THIRTY_SECOND,
        _ => DURATION_SIXTY_FOURTH,
    };
    Ok((i, TrillEffect { fret, duration }))
}

pub fn parse_tremolo_picking(i: &[u8]) -> PResult<'_, TremoloPickingEffect> {
    log::debug!("Parsing tremolo picking");
    let (i, value) = parse_signed_byte(i)?;
    let duration = match value {
        1 => DURATION_EIGHTH,
        2 => DURATION_SIXTEENTH,
        _ => DURATION_THIRTY_SECOND,
    };
    Ok((i, TremoloPickingEffect { duration }))
}

/// Harmonic table of the newer generation.
///
/// Codes 15, 17 and 22 are artificial harmonics deriving their pitch from
/// the fret value of the note; any other code aborts the decode.
pub fn parse_harmonic(
    note_value: i16,
) -> impl FnMut(&[u8]) -> IResult<&[u8], HarmonicEffect, GpError> {
    move |i: &[u8]| {
        let code_input = i;
        let (i, code) = parse_byte(i)?;
        log::debug!("Parsing harmonic {code}");
        let effect = match code {
            1 => HarmonicEffect::Natural,
            3 => HarmonicEffect::Tapped,
            4 => HarmonicEffect::Pinch,
            5 => HarmonicEffect::Semi,
            15 => HarmonicEffect::Artificial {
                pitch: Pitch {
                    just: (i32::from(note_value) + 7) / 12,
                    intonation: None,
                },
                octave: Octave::Ottava,
            },
            17 => HarmonicEffect::Artificial {
                pitch: Pitch {
                    just: i32::from(note_value),
                    intonation: None,
                },
                octave: Octave::Quindicesima,
            },
            22 => HarmonicEffect::Artificial {
                pitch: Pitch {
                    just: i32::from(note_value),
                    intonation: None,
                },
                octave: Octave::Ottava,
            },
            code => {
                return decode_failure(code_input, GpErrorKind::UnsupportedNoteEffect { code });
            }
        };
        Ok((i, effect))
    }
}

/// Parse a chord diagram.
///
/// The leading byte selects between the legacy layout shared by both
/// generations and the extended layout that differs per generation.
pub fn parse_chord(
    string_count: usize,
    generation: GpGeneration,
) -> impl FnMut(&[u8]) -> IResult<&[u8], Chord, GpError> {
    move |i: &[u8]| {
        log::debug!("Parsing chord for {string_count} strings");
        let (i, new_format) = parse_bool(i)?;
        if new_format {
            match generation {
                GpGeneration::Gp3 => parse_new_format_chord_gp3(i, string_count),
                GpGeneration::Gp4 => parse_new_format_chord_gp4(i, string_count),
            }
        } else {
            parse_old_format_chord(i, string_count)
        }
    }
}

fn parse_old_format_chord(i: &[u8], string_count: usize) -> PResult<'_, Chord> {
    log::debug!("Parsing old format chord");
    let (i, name) = parse_int_byte_sized_string(i)?;
    let (mut i, first_fret) = parse_int(i)?;
    let mut strings = vec![];
    if first_fret != 0 {
        for slot in 0..6 {
            let (inner, fret) = parse_int(i)?;
            i = inner;
            if slot < string_count {
                strings.push(fret);
            }
        }
    }
    let chord = Chord {
        length: string_count,
        name,
        first_fret,
        strings,
        ..Default::default()
    };
    Ok((i, chord))
}

/// Shared head of the extended chord layout: sharp flag, root/type/
/// extension/bass/tonality, add flag and the fixed-width name field.
#[allow(clippy::type_complexity)]
fn parse_new_format_chord_head(
    i: &[u8],
) -> PResult<'_, (bool, Pitch, ChordType, ChordExtension, Pitch, ChordAlteration, bool, String)> {
    let (i, sharp) = parse_bool(i)?;
    let (i, ()) = skip(i, 3)?;
    let intonation = if sharp {
        Intonation::Sharp
    } else {
        Intonation::Flat
    };
    let (i, root) = parse_int(i)?;
    let (i, kind) = parse_int(i)?;
    let (i, extension) = parse_int(i)?;
    let (i, bass) = parse_int(i)?;
    let (i, tonality) = parse_int(i)?;
    let (i, add) = parse_bool(i)?;
    let (i, name) = parse_byte_size_string(22)(i)?;
    Ok((
        i,
        (
            sharp,
            Pitch {
                just: root,
                intonation: Some(intonation),
            },
            ChordType::from_value(kind),
            ChordExtension::from_value(extension),
            Pitch {
                just: bass,
                intonation: Some(intonation),
            },
            ChordAlteration::from_value(tonality),
            add,
            name,
        ),
    ))
}

/// Cartesian expansion of the encoded barre slot arrays, kept as the
/// reference decoder computes it.
fn expand_barres(count: i32, frets: &[i32], starts: &[i32], ends: &[i32]) -> Vec<Barre> {
    let mut barres = vec![];
    for fret in frets {
        for start in starts {
            for end in ends {
                for _ in 0..count {
                    barres.push(Barre {
                        fret: *fret,
                        start: *start,
                        end: *end,
                    });
                }
            }
        }
    }
    barres
}

fn parse_new_format_chord_gp3(i: &[u8], string_count: usize) -> PResult<'_, Chord> {
    log::debug!("Parsing new format chord (gp3 layout)");
    let (i, (sharp, root, kind, extension, bass, tonality, add, name)) =
        parse_new_format_chord_head(i)?;
    let (i, fifth) = parse_int(i)?;
    let (i, ninth) = parse_int(i)?;
    let (i, eleventh) = parse_int(i)?;
    let (mut i, first_fret) = parse_int(i)?;
    let mut strings = vec![];
    for slot in 0..6 {
        let (inner, fret) = parse_int(i)?;
        i = inner;
        if slot < string_count {
            strings.push(fret);
        }
    }
    let (i, barre_count) = parse_int(i)?;
    let (i, (fret_a, fret_b)) = (parse_int, parse_int).parse(i)?;
    let (i, (start_a, start_b)) = (parse_int, parse_int).parse(i)?;
    let (mut i, (end_a, end_b)) = (parse_int, parse_int).parse(i)?;
    let barres = expand_barres(
        barre_count,
        &[fret_a, fret_b],
        &[start_a, start_b],
        &[end_a, end_b],
    );
    let mut omissions = vec![];
    for _ in 0..7 {
        let (inner, omission) = parse_bool(i)?;
        i = inner;
        omissions.push(omission);
    }
    let (i, ()) = skip(i, 1)?;
    let chord = Chord {
        length: string_count,
        name,
        sharp: Some(sharp),
        root: Some(root),
        kind: Some(kind),
        extension: Some(extension),
        bass: Some(bass),
        tonality: Some(tonality),
        add: Some(add),
        fifth: Some(ChordAlteration::from_value(fifth)),
        ninth: Some(ChordAlteration::from_value(ninth)),
        eleventh: Some(ChordAlteration::from_value(eleventh)),
        first_fret,
        strings,
        barres,
        omissions,
        new_format: true,
        ..Default::default()
    };
    Ok((i, chord))
}

fn parse_new_format_chord_gp4(i: &[u8], string_count: usize) -> PResult<'_, Chord> {
    log::debug!("Parsing new format chord (gp4 layout)");
    let (i, (sharp, root, kind, extension, bass, tonality, add, name)) =
        parse_new_format_chord_head(i)?;
    let (i, fifth) = parse_signed_byte(i)?;
    let (i, ninth) = parse_signed_byte(i)?;
    let (i, eleventh) = parse_signed_byte(i)?;
    let (mut i, first_fret) = parse_int(i)?;
    let mut strings = vec![];
    for slot in 0..7 {
        let (inner, fret) = parse_int(i)?;
        i = inner;
        if slot < string_count {
            strings.push(fret);
        }
    }
    let (mut i, barre_count) = parse_signed_byte(i)?;
    let mut slots = [[0i32; 5]; 3];
    for group in &mut slots {
        for slot in group.iter_mut() {
            let (inner, value) = parse_signed_byte(i)?;
            i = inner;
            *slot = i32::from(value);
        }
    }
    let barres = expand_barres(i32::from(barre_count), &slots[0], &slots[1], &slots[2]);
    let mut omissions = vec![];
    for _ in 0..7 {
        let (inner, omission) = parse_bool(i)?;
        i = inner;
        omissions.push(omission);
    }
    let (mut i, ()) = skip(i, 1)?;
    let mut fingerings = vec![];
    for _ in 0..7 {
        let (inner, finger) = parse_signed_byte(i)?;
        i = inner;
        fingerings.push(Fingering::from_byte(finger));
    }
    let (i, show) = parse_bool(i)?;
    let chord = Chord {
        length: string_count,
        name,
        sharp: Some(sharp),
        root: Some(root),
        kind: Some(kind),
        extension: Some(extension),
        bass: Some(bass),
        tonality: Some(tonality),
        add: Some(add),
        fifth: Some(ChordAlteration::from_value(i32::from(fifth))),
        ninth: Some(ChordAlteration::from_value(i32::from(ninth))),
        eleventh: Some(ChordAlteration::from_value(i32::from(eleventh))),
        first_fret,
        strings,
        barres,
        omissions,
        fingerings,
        show: Some(show),
        new_format: true,
    };
    Ok((i, chord))
}

/// Parse the beat effect block, whose byte layout diverges per generation.
pub fn parse_beat_effect(
    generation: GpGeneration,
) -> impl FnMut(&[u8]) -> IResult<&[u8], BeatEffect, GpError> {
    move |i: &[u8]| match generation {
        GpGeneration::Gp3 => parse_beat_effect_gp3(i),
        GpGeneration::Gp4 => parse_beat_effect_gp4(i),
    }
}

fn parse_beat_effect_gp3(i: &[u8]) -> PResult<'_, BeatEffect> {
    log::debug!("Parsing beat effect (gp3 layout)");
    let (mut i, flags) = parse_byte(i)?;
    let mut effect = BeatEffect {
        vibrato: flags & 0x01 != 0,
        fade_in: flags & 0x10 != 0,
        ..Default::default()
    };
    if flags & 0x20 != 0 {
        let (inner, slap_byte) = parse_byte(i)?;
        i = inner;
        if slap_byte == 0 {
            // tremolo bar dive: a single depth value
            let (inner, value) = parse_int(i)?;
            i = inner;
            effect.tremolo_bar = Some(BendEffect {
                kind: BendType::Dip,
                value,
                points: vec![BendPoint::default(); 3],
            });
        } else {
            let (inner, _) = parse_int(i)?;
            i = inner;
            effect.slap = SlapEffect::from_byte(slap_byte);
        }
    }
    if flags & 0x40 != 0 {
        let (inner, stroke) = parse_beat_stroke(i)?;
        i = inner;
        effect.stroke = stroke;
    }
    if flags & 0x04 != 0 {
        effect.harmonic = Some(HarmonicEffect::Natural);
    }
    if flags & 0x08 != 0 {
        effect.harmonic = Some(HarmonicEffect::Artificial {
            pitch: Pitch::default(),
            octave: Octave::None,
        });
    }
    Ok((i, effect))
}

fn parse_beat_effect_gp4(i: &[u8]) -> PResult<'_, BeatEffect> {
    log::debug!("Parsing beat effect (gp4 layout)");
    let (mut i, (flags1, flags2)) = (parse_byte, parse_byte).parse(i)?;
    let mut effect = BeatEffect {
        vibrato: flags1 & 0x01 != 0,
        fade_in: flags1 & 0x10 != 0,
        has_rasgueado: flags2 & 0x01 != 0,
        ..Default::default()
    };
    if flags1 & 0x20 != 0 {
        let (inner, slap_byte) = parse_byte(i)?;
        i = inner;
        effect.slap = SlapEffect::from_byte(slap_byte);
    }
    if flags2 & 0x04 != 0 {
        // the natural harmonic bit of the older layout carries a full
        // tremolo bar point list here
        let (inner, tremolo_bar) = parse_bend(i)?;
        i = inner;
        effect.tremolo_bar = Some(tremolo_bar);
    }
    if flags1 & 0x40 != 0 {
        let (inner, stroke) = parse_beat_stroke(i)?;
        i = inner;
        effect.stroke = stroke;
    }
    if flags2 & 0x02 != 0 {
        let (inner, direction) = parse_byte(i)?;
        i = inner;
        effect.pick_stroke = BeatStrokeDirection::from_byte(direction);
    }
    Ok((i, effect))
}

/// Parse the note effect block into `note.effect`.
pub fn parse_note_effect(
    note: &mut Note,
    generation: GpGeneration,
) -> impl FnMut(&[u8]) -> IResult<&[u8], (), GpError> + '_ {
    move |i: &[u8]| match generation {
        GpGeneration::Gp3 => parse_note_effect_gp3(i, note),
        GpGeneration::Gp4 => parse_note_effect_gp4(i, note),
    }
}

fn parse_note_effect_gp3<'a>(i: &'a [u8], note: &mut Note) -> PResult<'a, ()> {
    log::debug!("Parsing note effect (gp3 layout)");
    let (mut i, flags) = parse_byte(i)?;
    let mut effect = NoteEffect::default();
    if flags & 0x01 != 0 {
        let (inner, bend) = parse_bend(i)?;
        i = inner;
        effect.bend = Some(bend);
    }
    if flags & 0x10 != 0 {
        let (inner, grace) = parse_grace_effect(i)?;
        i = inner;
        effect.grace = Some(grace);
    }
    if flags & 0x04 != 0 {
        // slide presence only, the older layout encodes no slide kind
        effect.slides = vec![SlideType::ShiftSlideTo];
    }
    note.effect = Some(effect);
    Ok((i, ()))
}

fn parse_note_effect_gp4<'a>(i: &'a [u8], note: &mut Note) -> PResult<'a, ()> {
    log::debug!("Parsing note effect (gp4 layout)");
    let (mut i, (flags1, flags2)) = (parse_byte, parse_byte).parse(i)?;
    let mut effect = NoteEffect {
        hammer: flags1 & 0x02 != 0,
        let_ring: flags1 & 0x08 != 0,
        staccato: flags2 & 0x01 != 0,
        palm_mute: flags2 & 0x02 != 0,
        vibrato: flags2 & 0x40 != 0,
        ..Default::default()
    };
    if flags1 & 0x01 != 0 {
        let (inner, bend) = parse_bend(i)?;
        i = inner;
        effect.bend = Some(bend);
    }
    if flags1 & 0x10 != 0 {
        let (inner, grace) = parse_grace_effect(i)?;
        i = inner;
        effect.grace = Some(grace);
    }
    if flags2 & 0x04 != 0 {
        let (inner, tremolo_picking) = parse_tremolo_picking(i)?;
        i = inner;
        effect.tremolo_picking = Some(tremolo_picking);
    }
    if flags2 & 0x08 != 0 {
        let (inner, slide) = parse_signed_byte(i)?;
        i = inner;
        effect.slides = vec![SlideType::from_byte(slide)];
    }
    if flags2 & 0x10 != 0 {
        let (inner, harmonic) = parse_harmonic(note.value)(i)?;
        i = inner;
        effect.harmonic = Some(harmonic);
    }
    if flags2 & 0x20 != 0 {
        let (inner, trill) = parse_trill_effect(i)?;
        i = inner;
        effect.trill = Some(trill);
    }
    note.effect = Some(effect);
    Ok((i, ()))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MixTableItem {
    pub value: i32,
    pub duration: i32,
    pub all_tracks: bool,
}

impl MixTableItem {
    const fn new(value: i32) -> Self {
        MixTableItem {
            value,
            duration: 0,
            all_tracks: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MixTableChange {
    pub instrument: Option<MixTableItem>,
    pub volume: Option<MixTableItem>,
    pub balance: Option<MixTableItem>,
    pub chorus: Option<MixTableItem>,
    pub reverb: Option<MixTableItem>,
    pub phaser: Option<MixTableItem>,
    pub tremolo: Option<MixTableItem>,
    pub tempo: Option<MixTableItem>,
}

/// Parse a mix table change event.
///
/// Each negative leading byte means "no change" for its parameter; a
/// duration byte follows for every populated parameter except the
/// instrument. The newer generation appends a flag byte stamping the
/// "apply to all tracks" bit onto the populated parameters.
pub fn parse_mix_table_change(
    generation: GpGeneration,
) -> impl FnMut(&[u8]) -> IResult<&[u8], MixTableChange, GpError> {
    move |i: &[u8]| {
        log::debug!("Parsing mix table change");
        let mut change = MixTableChange::default();
        let (i, instrument) = parse_signed_byte(i)?;
        if instrument >= 0 {
            change.instrument = Some(MixTableItem::new(i32::from(instrument)));
        }
        let (i, volume) = parse_signed_byte(i)?;
        if volume >= 0 {
            change.volume = Some(MixTableItem::new(i32::from(volume)));
        }
        let (i, balance) = parse_signed_byte(i)?;
        if balance >= 0 {
            change.balance = Some(MixTableItem::new(i32::from(balance)));
        }
        let (i, chorus) = parse_signed_byte(i)?;
        if chorus >= 0 {
            change.chorus = Some(MixTableItem::new(i32::from(chorus)));
        }
        let (i, reverb) = parse_signed_byte(i)?;
        if reverb >= 0 {
            change.reverb = Some(MixTableItem::new(i32::from(reverb)));
        }
        let (i, phaser) = parse_signed_byte(i)?;
        if phaser >= 0 {
            change.phaser = Some(MixTableItem::new(i32::from(phaser)));
        }
        let (i, tremolo) = parse_signed_byte(i)?;
        if tremolo >= 0 {
            change.tremolo = Some(MixTableItem::new(i32::from(tremolo)));
        }
        let (mut i, tempo) = parse_int(i)?;
        if tempo != 0 {
            change.tempo = Some(MixTableItem::new(tempo));
        }
        if let Some(volume) = &mut change.volume {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            volume.duration = i32::from(duration);
        }
        if let Some(balance) = &mut change.balance {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            balance.duration = i32::from(duration);
        }
        if let Some(chorus) = &mut change.chorus {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            chorus.duration = i32::from(duration);
        }
        if let Some(reverb) = &mut change.reverb {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            reverb.duration = i32::from(duration);
        }
        if let Some(phaser) = &mut change.phaser {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            phaser.duration = i32::from(duration);
        }
        if let Some(tremolo) = &mut change.tremolo {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            tremolo.duration = i32::from(duration);
        }
        if let Some(tempo) = &mut change.tempo {
            let (inner, duration) = parse_signed_byte(i)?;
            i = inner;
            tempo.duration = i32::from(duration);
        }
        if generation == GpGeneration::Gp4 {
            let (inner, flags) = parse_byte(i)?;
            i = inner;
            if let Some(volume) = &mut change.volume {
                volume.all_tracks = flags & 0x01 != 0;
            }
            if let Some(balance) = &mut change.balance {
                balance.all_tracks = flags & 0x02 != 0;
            }
            if let Some(chorus) = &mut change.chorus {
                chorus.all_tracks = flags & 0x04 != 0;
            }
            if let Some(reverb) = &mut change.reverb {
                reverb.all_tracks = flags & 0x08 != 0;
            }
            if let Some(phaser) = &mut change.phaser {
                phaser.all_tracks = flags & 0x10 != 0;
            }
            if let Some(tremolo) = &mut change.tremolo {
                tremolo.all_tracks = flags & 0x20 != 0;
            }
        }
        Ok((i, change))
    }
}

/// Parse the fixed 64-entry MIDI channel table (4 ports of 16 channels).
pub fn parse_midi_channels(i: &[u8]) -> PResult<'_, Vec<MidiChannel>> {
    log::debug!("Parsing midi channels");
    let mut channels = Vec::with_capacity(MIDI_CHANNEL_COUNT);
    let mut i = i;
    for channel_id in 0..MIDI_CHANNEL_COUNT {
        let (inner, channel) = parse_midi_channel(channel_id as u8)(i)?;
        i = inner;
        channels.push(channel);
    }
    Ok((i, channels))
}

fn parse_midi_channel(channel_id: u8) -> impl FnMut(&[u8]) -> IResult<&[u8], MidiChannel, GpError> {
    move |i: &[u8]| {
        let (i, instrument) = parse_int(i)?;
        let (i, (volume, balance, chorus, reverb, phaser, tremolo)) = (
            parse_signed_byte,
            parse_signed_byte,
            parse_signed_byte,
            parse_signed_byte,
            parse_signed_byte,
            parse_signed_byte,
        )
            .parse(i)?;
        let (i, ()) = skip(i, 2)?;
        let channel = MidiChannel {
            channel_id,
            effect_channel_id: channel_id,
            // a percussion channel with no instrument plays the standard kit
            instrument: if channel_id % 16 == DEFAULT_PERCUSSION_CHANNEL && instrument == -1 {
                0
            } else {
                instrument
            },
            volume: to_channel_value(volume),
            balance: to_channel_value(balance),
            chorus: to_channel_value(chorus),
            reverb: to_channel_value(reverb),
            phaser: to_channel_value(phaser),
            tremolo: to_channel_value(tremolo),
        };
        Ok((i, channel))
    }
}

/// Parse one measure header.
///
/// The flag byte lists the data present in the measure:
///
/// - *0x01*: numerator of the time signature
/// - *0x02*: denominator of the time signature
/// - *0x04*: beginning of repeat
/// - *0x08*: end of repeat
/// - *0x10*: number of alternate ending
/// - *0x20*: presence of a marker
/// - *0x40*: tonality of the measure
/// - *0x80*: presence of a double bar
///
/// Optional fields are read from lowest to highest bit. Time and key
/// signatures propagate from the previous header when their bit is
/// clear; a first measure without a time signature is a hard error.
pub fn parse_measure_header<'h>(
    previous_headers: &'h [MeasureHeader],
    index: usize,
    triplet_feel: TripletFeel,
) -> impl FnMut(&[u8]) -> IResult<&[u8], MeasureHeader, GpError> + 'h {
    move |i: &[u8]| {
        log::debug!("Parsing measure header {index}");
        let header_input = i;
        let (mut i, flag) = parse_byte(i)?;
        log::debug!("Flags: {flag:08b}");
        let previous = previous_headers.last();

        let numerator = if flag & 0x01 != 0 {
            let (inner, numerator) = parse_signed_byte(i)?;
            i = inner;
            numerator
        } else if let Some(previous) = previous {
            previous.time_signature.numerator
        } else {
            return decode_failure(header_input, GpErrorKind::MissingTimeSignature { index });
        };

        let denominator = if flag & 0x02 != 0 {
            let (inner, denominator) = parse_signed_byte(i)?;
            i = inner;
            Duration {
                value: denominator as u16,
                ..Default::default()
            }
        } else if let Some(previous) = previous {
            previous.time_signature.denominator.clone()
        } else {
            return decode_failure(header_input, GpErrorKind::MissingTimeSignature { index });
        };

        let mut header = MeasureHeader {
            flag,
            index,
            time_signature: TimeSignature {
                numerator,
                denominator,
            },
            repeat_begin: flag & 0x04 != 0,
            triplet_feel,
            has_double_bar: flag & 0x80 != 0,
            ..Default::default()
        };

        if flag & 0x08 != 0 {
            let (inner, repeat_end) = parse_signed_byte(i)?;
            i = inner;
            header.repeat_end = repeat_end;
        }

        if flag & 0x10 != 0 {
            let (inner, value) = parse_signed_byte(i)?;
            i = inner;
            // OR the masks of the headers since the last repeat begin,
            // the new mask covers the passes not already taken
            let mut accumulated = 0;
            for previous in previous_headers.iter().rev() {
                if previous.repeat_begin {
                    break;
                }
                accumulated |= previous.repeat_alternative;
            }
            header.repeat_alternative =
                1i32.wrapping_shl(value as u32).wrapping_sub(1 ^ accumulated);
        }

        if flag & 0x20 != 0 {
            let (inner, marker) = parse_marker(i)?;
            i = inner;
            header.marker = Some(marker);
        }

        if flag & 0x40 != 0 {
            let (inner, root) = parse_signed_byte(i)?;
            i = inner;
            let (inner, kind) = parse_signed_byte(i)?;
            i = inner;
            header.key_signature = KeySignature::new(root, kind != 0);
        } else if let Some(previous) = previous {
            header.key_signature = previous.key_signature;
        }

        log::debug!("{header:?}");
        Ok((i, header))
    }
}

/// Parse all measure headers and derive the repeat groups.
///
/// A new group starts on every repeat-begin header and whenever a closed
/// group receives a header with no alternate ending.
pub fn parse_measure_headers(
    measure_count: usize,
    triplet_feel: TripletFeel,
) -> impl FnMut(&[u8]) -> IResult<&[u8], (Vec<MeasureHeader>, Vec<RepeatGroup>), GpError> {
    move |i: &[u8]| {
        log::debug!("Parsing {measure_count} measure headers");
        let mut i = i;
        let mut headers: Vec<MeasureHeader> = Vec::with_capacity(measure_count.min(1024));
        let mut repeat_groups: Vec<RepeatGroup> = vec![RepeatGroup::default()];
        for index in 1..=measure_count {
            let (rest, header) = parse_measure_header(&headers, index, triplet_feel)(i)?;
            i = rest;
            let start_new_group = header.repeat_begin
                || repeat_groups
                    .last()
                    .is_some_and(|group| group.is_closed && header.repeat_alternative <= 0);
            if start_new_group {
                repeat_groups.push(RepeatGroup::default());
            }
            if let Some(group) = repeat_groups.last_mut() {
                group.add_measure_header(headers.len());
            }
            headers.push(header);
        }
        Ok((i, (headers, repeat_groups)))
    }
}

fn parse_notices(i: &[u8]) -> PResult<'_, Vec<String>> {
    let (mut i, notice_count) = parse_int(i)?;
    log::debug!("Notice count: {notice_count}");
    let mut notices = vec![];
    for _ in 0..notice_count {
        let (inner, notice) = parse_int_byte_sized_string(i)?;
        i = inner;
        notices.push(notice);
    }
    Ok((i, notices))
}

/// Parse information about the piece of music.
fn parse_info(i: &[u8]) -> PResult<'_, SongInfo> {
    log::debug!("Parsing song info");
    map(
        (
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_int_byte_sized_string,
            parse_notices,
        ),
        |(title, subtitle, artist, album, words, copyright, tab, instructions, notices)| {
            SongInfo {
                title,
                subtitle,
                artist,
                album,
                words: words.clone(),
                music: words,
                copyright,
                tab,
                instructions,
                notices,
            }
        },
    )
    .parse(i)
}

/// Lyrics block of the newer generation: a track choice and 5 fixed lines.
fn parse_lyrics(i: &[u8]) -> PResult<'_, Lyrics> {
    log::debug!("Parsing lyrics");
    let (mut i, track_choice) = parse_int(i)?;
    let mut lines = Vec::with_capacity(MAX_LYRIC_LINES);
    for _ in 0..MAX_LYRIC_LINES {
        let (inner, start_measure) = parse_int(i)?;
        let (inner, text) = parse_int_sized_string(inner)?;
        i = inner;
        lines.push(LyricLine {
            start_measure,
            text,
        });
    }
    Ok((
        i,
        Lyrics {
            track_choice,
            lines,
        },
    ))
}

fn parse_clipboard(i: &[u8]) -> PResult<'_, Clipboard> {
    log::debug!("Parsing clipboard");
    map(
        (parse_int, parse_int, parse_int, parse_int),
        |(start_measure, stop_measure, start_track, stop_track)| Clipboard {
            start_measure,
            stop_measure,
            start_track,
            stop_track,
        },
    )
    .parse(i)
}

/// Parse the song-level preamble up to and including the channel table.
///
/// The generations differ in the presence of the clipboard and lyrics
/// blocks and in the width of the key signature scalar.
fn parse_song_preamble<'v>(
    version: &'v GpVersion,
    generation: GpGeneration,
) -> impl FnMut(&[u8]) -> IResult<&[u8], Song, GpError> + 'v {
    move |i: &[u8]| {
        let mut i = i;
        let mut clipboard = None;
        if generation == GpGeneration::Gp4 && version.raw.starts_with("CLIPBOARD") {
            let (inner, parsed) = parse_clipboard(i)?;
            i = inner;
            clipboard = Some(parsed);
        }

        let (inner, song_info) = parse_info(i)?;
        i = inner;

        let (inner, triplet) = parse_bool(i)?;
        i = inner;
        let triplet_feel = if triplet {
            TripletFeel::Eighth
        } else {
            TripletFeel::None
        };

        let mut lyrics = None;
        if generation == GpGeneration::Gp4 {
            let (inner, parsed) = parse_lyrics(i)?;
            i = inner;
            lyrics = Some(parsed);
        }

        let (inner, tempo) = parse_int(i)?;
        i = inner;
        log::debug!("Tempo: {tempo}");

        // the key signature scalar narrowed to a single byte in gp4
        let key_root = match generation {
            GpGeneration::Gp3 => {
                let (inner, root) = parse_int(i)?;
                i = inner;
                root as i8
            }
            GpGeneration::Gp4 => {
                let (inner, root) = parse_signed_byte(i)?;
                i = inner;
                root
            }
        };

        if generation == GpGeneration::Gp4 {
            let (inner, _octave) = parse_int(i)?;
            i = inner;
        }

        let (inner, midi_channels) = parse_midi_channels(i)?;
        i = inner;

        let song = Song {
            version: version.clone(),
            clipboard,
            song_info,
            triplet_feel,
            lyrics,
            tempo,
            key_signature: KeySignature::new(key_root, false),
            midi_channels,
            repeat_groups: vec![],
            measure_headers: vec![],
            tracks: vec![],
            master_effect: MasterEffect::default(),
        };
        Ok((i, song))
    }
}

/// Decode a complete tablature file.
///
/// Returns `Ok(None)` when the version string names no supported format
/// generation; the caller decides how to surface that. All other failures
/// abort the decode with a typed error, no partial song is ever returned.
pub fn parse_gp_data(file_data: &[u8]) -> Result<Option<Song>, TabError> {
    let (rest, version) =
        parse_gp_version(file_data).map_err(|err| classify_error(file_data, err))?;
    log::debug!("Version: {version:?}");

    let Some(generation) = version.generation() else {
        log::info!("No decoder for tablature version {:?}", version.raw);
        return Ok(None);
    };

    let (rest, base_song) = parse_song_preamble(&version, generation)(rest)
        .map_err(|err| classify_error(file_data, err))?;

    // make parser and parse music data
    let mut parser = MusicParser::new(base_song, generation);
    let (_rest, ()) = parser
        .parse_music_data(rest)
        .map_err(|err| classify_error(file_data, err))?;
    Ok(Some(parser.take_song()))
}

/// Turn an internal parser error into the public typed error, resolving
/// the remaining-input length into an absolute byte offset.
fn classify_error(file_data: &[u8], err: nom::Err<GpError>) -> TabError {
    match err {
        nom::Err::Incomplete(_) => TabError::Truncated {
            offset: file_data.len(),
        },
        nom::Err::Error(inner) | nom::Err::Failure(inner) => {
            let offset = file_data.len().saturating_sub(inner.remaining);
            match inner.kind {
                GpErrorKind::Nom(ErrorKind::Eof) => TabError::Truncated { offset },
                GpErrorKind::Nom(kind) => {
                    TabError::ParsingError(format!("{kind:?} error at byte {offset}"))
                }
                GpErrorKind::MalformedLengthPrefix => TabError::MalformedLengthPrefix { offset },
                GpErrorKind::MissingTimeSignature { index } => {
                    TabError::MissingTimeSignature { index }
                }
                GpErrorKind::UnsupportedNoteEffect { code } => {
                    TabError::UnsupportedNoteEffect { code, offset }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_version_numbers() {
        let cases = [
            ("FICHIER GUITAR PRO v3.00", Some(("v3", "00"))),
            ("FICHIER GUITAR PRO v4.00", Some(("v4", "00"))),
            ("FICHIER GUITAR PRO v4.06", Some(("v4", "06"))),
            ("CLIPBOARD v4.06 GUITAR PRO", Some(("v4", "06"))),
            ("FICHIER GUITARE PRO v1.02", Some(("v1", "02"))),
            ("NOT A TABLATURE FILE", None),
        ];
        for (raw, expected) in cases {
            let expected =
                expected.map(|(major, minor)| (major.to_string(), minor.to_string()));
            assert_eq!(extract_version_numbers(raw), expected, "raw: {raw}");
        }
    }

    #[test]
    fn test_unknown_major_has_no_generation() {
        let (_rest, version) = parse_gp_version(&version_bytes("FICHIER GUITAR PRO v5.00"))
            .expect("version header should parse");
        assert_eq!(version.major, "v5");
        assert_eq!(version.generation(), None);
    }

    #[test]
    fn test_to_channel_value() {
        assert_eq!(to_channel_value(0), 0);
        assert_eq!(to_channel_value(-1), 0);
        assert_eq!(to_channel_value(8), 64);
        assert_eq!(to_channel_value(16), 128);
        assert_eq!(to_channel_value(127), 1016);
    }

    #[test]
    fn test_duration_with_tuplet() {
        let data = [2u8, 3, 0, 0, 0];
        let (rest, duration) = parse_duration(false, true)(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(duration.value, 16);
        assert_eq!(
            duration.tuplet,
            Tuplet {
                enters: 3,
                times: 2
            }
        );
    }

    #[test]
    fn test_unrecognized_tuplet_keeps_default_ratio() {
        let data = [0u8, 4, 0, 0, 0];
        let (_rest, duration) = parse_duration(false, true)(&data).unwrap();
        assert_eq!(duration.value, DURATION_QUARTER);
        assert_eq!(duration.tuplet, Tuplet::default());
    }

    #[test]
    fn test_gp3_beat_effect_slap_skips_bar_value() {
        // slap byte 2 (popping would be 3) followed by the unused int
        let data = [0x20u8, 2, 0, 0, 0, 0];
        let (rest, effect) = parse_beat_effect(GpGeneration::Gp3)(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(effect.slap, SlapEffect::Slapping);
        assert_eq!(effect.tremolo_bar, None);
    }

    #[test]
    fn test_gp3_beat_effect_tremolo_bar() {
        let data = [0x20u8, 0, 100, 0, 0, 0];
        let (_rest, effect) = parse_beat_effect(GpGeneration::Gp3)(&data).unwrap();
        let tremolo_bar = effect.tremolo_bar.expect("tremolo bar should be set");
        assert_eq!(tremolo_bar.kind, BendType::Dip);
        assert_eq!(tremolo_bar.value, 100);
        assert_eq!(tremolo_bar.points.len(), 3);
    }

    #[test]
    fn test_gp4_beat_effect_stroke_and_pick_stroke() {
        // flags1: slap + stroke, flags2: pick stroke
        let data = [0x20u8 | 0x40, 0x02, 3, 5, 0, 2];
        let (rest, effect) = parse_beat_effect(GpGeneration::Gp4)(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(effect.slap, SlapEffect::Popping);
        assert_eq!(effect.stroke.direction, BeatStrokeDirection::Up);
        assert_eq!(effect.stroke.value, DURATION_EIGHTH);
        assert_eq!(effect.pick_stroke, BeatStrokeDirection::Down);
        assert!(!effect.has_rasgueado);
    }

    #[test]
    fn test_gp4_harmonic_pitch_derivation() {
        let (_rest, harmonic) = parse_harmonic(5)(&[17u8]).unwrap();
        assert_eq!(
            harmonic,
            HarmonicEffect::Artificial {
                pitch: Pitch {
                    just: 5,
                    intonation: None
                },
                octave: Octave::Quindicesima,
            }
        );
    }

    #[test]
    fn test_gp4_unsupported_harmonic_code() {
        let err = parse_harmonic(0)(&[7u8]).unwrap_err();
        match err {
            nom::Err::Failure(GpError { kind, .. }) => {
                assert_eq!(kind, GpErrorKind::UnsupportedNoteEffect { code: 7 });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mix_table_change_all_tracks_flags() {
        // only the volume changes: value 10, duration 2, all-tracks bit set
        let data = [
            0xFFu8, 10, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 2, 0x01,
        ];
        let (rest, change) = parse_mix_table_change(GpGeneration::Gp4)(&data).unwrap();
        assert!(rest.is_empty());
        let volume = change.volume.expect("volume should be set");
        assert_eq!(volume.value, 10);
        assert_eq!(volume.duration, 2);
        assert!(volume.all_tracks);
        assert_eq!(change.instrument, None);
        assert_eq!(change.tempo, None);
    }

    #[test]
    fn test_old_format_chord_without_frets() {
        let mut data = vec![0u8];
        data.extend_from_slice(&2i32.to_le_bytes());
        data.push(1);
        data.push(b'C');
        data.extend_from_slice(&0i32.to_le_bytes());
        let (rest, chord) = parse_chord(6, GpGeneration::Gp4)(&data).unwrap();
        assert!(rest.is_empty());
        assert_eq!(chord.name, "C");
        assert_eq!(chord.first_fret, 0);
        assert!(chord.strings.is_empty());
        assert!(!chord.new_format);
    }

    #[test]
    fn test_key_signature_display() {
        assert_eq!(KeySignature::new(0, false).to_string(), "C major");
        assert_eq!(KeySignature::new(2, false).to_string(), "D major");
        assert_eq!(KeySignature::new(2, true).to_string(), "A minor");
        assert_eq!(KeySignature::new(100, false).to_string(), "unknown key (100)");
    }

    fn version_bytes(version: &str) -> Vec<u8> {
        let mut data = vec![version.len() as u8];
        data.extend_from_slice(version.as_bytes());
        data.resize(31, 0);
        data
    }
}
