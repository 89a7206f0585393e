use crate::parser::primitive_parser::{
    parse_byte, parse_byte_size_string, parse_int, parse_int_byte_sized_string,
    parse_signed_byte,
};
use crate::parser::song_parser::{
    parse_beat_effect, parse_chord, parse_color, parse_duration, parse_measure_headers,
    parse_mix_table_change, parse_note_effect, Beat, BeatStatus, Fingering, GpGeneration,
    GuitarString, LineBreak, Measure, MeasureClef, MidiChannel, Note, NoteEffect, NoteType, Song,
    Track, Voice, QUARTER_TIME, TRACK_MAX_STRINGS,
};
use crate::parser::{decode_failure, GpError, GpErrorKind, PResult};
use nom::error::ErrorKind;
use nom::{IResult, Parser};

/// Last sounding note value per string, per track.
///
/// Strings are numbered 1..=7, slot 0 stays unused.
type TiedNoteTable = Vec<[Option<i16>; TRACK_MAX_STRINGS + 1]>;

pub struct MusicParser {
    song: Song,
    generation: GpGeneration,
    tied_notes: TiedNoteTable,
}

impl MusicParser {
    pub const fn new(song: Song, generation: GpGeneration) -> Self {
        Self {
            song,
            generation,
            tied_notes: vec![],
        }
    }

    pub fn take_song(&mut self) -> Song {
        std::mem::take(&mut self.song)
    }

    pub fn parse_music_data<'a>(&mut self, i: &'a [u8]) -> PResult<'a, ()> {
        let count_input = i;
        let (i, (measure_count, track_count)) = (
            parse_int, // Measure count
            parse_int, // Track count
        )
            .parse(i)?;

        log::debug!(
            "Parsing music data -> track_count: {track_count} measure_count: {measure_count}"
        );

        let (Ok(measure_count), Ok(track_count)) = (
            usize::try_from(measure_count),
            usize::try_from(track_count),
        ) else {
            return decode_failure(count_input, GpErrorKind::Nom(ErrorKind::Verify));
        };

        let (i, (measure_headers, repeat_groups)) =
            parse_measure_headers(measure_count, self.song.triplet_feel)(i)?;
        self.song.measure_headers = measure_headers;
        self.song.repeat_groups = repeat_groups;

        let (i, tracks) = self.parse_tracks(track_count)(i)?;
        self.song.tracks = tracks;
        self.tied_notes = vec![[None; TRACK_MAX_STRINGS + 1]; track_count];

        let (i, ()) = self.parse_measures()(i)?;
        Ok((i, ()))
    }

    pub fn parse_tracks(
        &self,
        track_count: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Vec<Track>, GpError> + '_ {
        move |i| {
            log::debug!("Parsing {track_count} tracks");
            let mut i = i;
            let mut tracks = Vec::with_capacity(track_count.min(64));
            for index in 0..track_count {
                let (inner, track) = self.parse_track(index)(i)?;
                i = inner;
                tracks.push(track);
            }
            Ok((i, tracks))
        }
    }

    /// Parse a single track record.
    ///
    /// The flag byte presides the track's attributes (0x01 drums track,
    /// 0x02 12-stringed guitar track, 0x04 banjo track), followed by the
    /// 40-character name, the string count and 7 tuning slots stored from
    /// the highest to the lowest string, the MIDI port, the channel
    /// assignment, the fret count, the capo offset and the track color.
    pub fn parse_track(
        &self,
        index: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Track, GpError> + '_ {
        move |i| {
            log::debug!("--------");
            log::debug!("Parsing track {index}");
            let (i, flag) = parse_byte(i)?;

            let (i, name) = parse_byte_size_string(40)(i)?;
            log::debug!("Track name: {name}");

            let string_count_input = i;
            let (mut i, string_count) = parse_int(i)?;
            log::debug!("String count: {string_count}");
            if string_count < 0 {
                return decode_failure(string_count_input, GpErrorKind::Nom(ErrorKind::Verify));
            }

            // 7 tuning slots, only the first `string_count` are real strings
            let mut strings = vec![];
            for slot in 0..TRACK_MAX_STRINGS {
                let (inner, tuning) = parse_int(i)?;
                i = inner;
                if (slot as i32) < string_count {
                    strings.push(GuitarString {
                        index: slot as u8 + 1,
                        tuning,
                    });
                }
            }
            log::debug!("Strings: {strings:?}");

            let (i, port) = parse_int(i)?;
            log::debug!("Midi port: {port}");

            let (i, channel) = self.parse_track_channel()(i)?;
            log::debug!("Midi channel: {channel:?}");

            let (i, fret_count) = parse_int(i)?;
            log::debug!("Fret count: {fret_count}");

            let (i, offset) = parse_int(i)?;
            log::debug!("Capo offset: {offset}");

            let (i, color) = parse_color(i)?;

            let track = Track {
                index,
                flag,
                name,
                string_count,
                strings,
                port,
                channel,
                fret_count,
                offset,
                color,
                measures: vec![],
            };
            Ok((i, track))
        }
    }

    /// Read the track's MIDI channel assignment.
    ///
    /// Two integers: the 1-based channel table index and the 1-based
    /// effect channel. The table entry is copied by value; an out of
    /// range index leaves the track without a channel.
    pub fn parse_track_channel(
        &self,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Option<MidiChannel>, GpError> + '_ {
        move |i| {
            let (i, (gm_channel_1, gm_channel_2)) = (parse_int, parse_int).parse(i)?;
            log::debug!("Track channel gm1: {gm_channel_1} gm2: {gm_channel_2}");
            let channel = usize::try_from(i64::from(gm_channel_1) - 1)
                .ok()
                .and_then(|table_index| self.song.midi_channels.get(table_index))
                .map(|table_channel| {
                    let mut channel = table_channel.clone();
                    if channel.instrument < 0 {
                        channel.instrument = 0;
                    }
                    if !channel.is_percussion() {
                        channel.effect_channel_id = (i64::from(gm_channel_2) - 1) as u8;
                    }
                    channel
                });
            Ok((i, channel))
        }
    }

    /// Read measures. Measures are written in the following order:
    /// - measure 1/track 1
    /// - measure 1/track 2
    /// - ...
    /// - measure 1/track m
    /// - measure 2/track 1
    /// - ...
    /// - measure n/track m
    pub fn parse_measures(&mut self) -> impl FnMut(&[u8]) -> IResult<&[u8], (), GpError> + '_ {
        move |i: &[u8]| {
            log::debug!("--------");
            log::debug!("Parsing measures");
            let mut i = i;
            let mut start = QUARTER_TIME;
            for measure_index in 0..self.song.measure_headers.len() {
                // back-fill the header start time
                self.song.measure_headers[measure_index].start_time = start;
                for track_index in 0..self.song.tracks.len() {
                    let (inner, measure) = self.parse_measure(start, track_index)(i)?;
                    i = inner;
                    self.commit_measure(track_index, measure);
                }
                let time_signature = &self.song.measure_headers[measure_index].time_signature;
                start += i64::from(time_signature.numerator)
                    * i64::from(time_signature.denominator.value);
            }
            Ok((i, ()))
        }
    }

    pub fn parse_measure(
        &self,
        measure_start: i64,
        track_index: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Measure, GpError> + '_ {
        move |i: &[u8]| {
            log::debug!("--------");
            log::debug!("Parsing measure for track {track_index}");
            let (i, voice) = self.parse_voice(measure_start, track_index)(i)?;
            let measure = Measure {
                start_time: measure_start,
                clef: MeasureClef::Alto,
                line_break: LineBreak::None,
                voices: vec![voice],
            };
            Ok((i, measure))
        }
    }

    pub fn parse_voice(
        &self,
        measure_start: i64,
        track_index: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Voice, GpError> + '_ {
        move |i: &[u8]| {
            let (mut i, beat_count) = parse_int(i)?;
            log::debug!("...with {beat_count} beats");
            let mut voice = Voice::default();
            let mut beat_start = measure_start;
            for _ in 0..beat_count {
                let (inner, beat) = self.parse_beat(beat_start, track_index)(i)?;
                i = inner;
                beat_start += i64::from(beat.duration.value);
                voice.beats.push(beat);
            }
            Ok((i, voice))
        }
    }

    /// Parse one beat. The flag byte lists the data present:
    ///
    /// - *0x01*: dotted note
    /// - *0x02*: presence of a chord diagram
    /// - *0x04*: presence of a text
    /// - *0x08*: presence of effects
    /// - *0x10*: presence of a mix table change event
    /// - *0x20*: the beat is an n-tuplet
    /// - *0x40*: status byte follows (empty or rest)
    ///
    /// The optional fields are followed by the note-presence bitmap over
    /// the track's strings and one note record per set bit.
    pub fn parse_beat(
        &self,
        start: i64,
        track_index: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Beat, GpError> + '_ {
        move |i: &[u8]| {
            let (mut i, flags) = parse_byte(i)?;
            let mut beat = Beat {
                start,
                ..Default::default()
            };

            if flags & 0x40 != 0 {
                let (inner, status) = parse_byte(i)?;
                i = inner;
                beat.status = BeatStatus::from_byte(status);
            }

            let (inner, duration) = parse_duration(flags & 0x01 != 0, flags & 0x20 != 0)(i)?;
            i = inner;
            beat.duration = duration;

            let track = &self.song.tracks[track_index];

            if flags & 0x02 != 0 {
                let (inner, chord) = parse_chord(track.strings.len(), self.generation)(i)?;
                i = inner;
                beat.effect.chord = Some(chord);
            }

            if flags & 0x04 != 0 {
                let (inner, text) = parse_int_byte_sized_string(i)?;
                i = inner;
                log::debug!("Beat text: {text}");
                beat.text = Some(text);
            }

            if flags & 0x08 != 0 {
                // the effect block replaces the beat effect wholesale, only
                // an already parsed chord survives
                let chord = beat.effect.chord.take();
                let (inner, mut effect) = parse_beat_effect(self.generation)(i)?;
                i = inner;
                effect.chord = chord;
                beat.effect = effect;
            }

            if flags & 0x10 != 0 {
                let (inner, mix_table_change) = parse_mix_table_change(self.generation)(i)?;
                i = inner;
                beat.effect.mix_table_change = Some(mix_table_change);
            }

            let (inner, string_flags) = parse_byte(i)?;
            i = inner;
            log::debug!(
                "Parsing notes for beat strings:{}, flags:{string_flags:08b}",
                track.strings.len()
            );
            for string in &track.strings {
                if string_flags & (1 << (7 - string.index)) != 0 {
                    let (inner, note) = self.parse_note(string, track_index)(i)?;
                    i = inner;
                    beat.notes.push(note);
                }
            }
            Ok((i, beat))
        }
    }

    /// Parse one note record. The flag byte lists the data present:
    ///
    /// - *0x01*: time-independent duration
    /// - *0x02*: heavy accentuated note
    /// - *0x04*: ghost note
    /// - *0x08*: presence of a note effect
    /// - *0x10*: dynamics
    /// - *0x20*: fret (note type and value)
    /// - *0x40*: accentuated note
    /// - *0x80*: left and right hand fingering
    pub fn parse_note(
        &self,
        guitar_string: &GuitarString,
        track_index: usize,
    ) -> impl FnMut(&[u8]) -> IResult<&[u8], Note, GpError> + '_ {
        let string_index = guitar_string.index;
        move |i: &[u8]| {
            log::debug!("Parsing note for string {string_index}");
            let (mut i, flags) = parse_byte(i)?;
            let mut note = Note {
                string: string_index,
                ..Default::default()
            };

            if flags & 0x20 != 0 {
                let (inner, note_type) = parse_byte(i)?;
                i = inner;
                note.kind = NoteType::from_byte(note_type);
            }

            if flags & 0x01 != 0 {
                let (inner, (duration, tuplet)) =
                    (parse_signed_byte, parse_signed_byte).parse(i)?;
                i = inner;
                note.duration = Some(duration);
                note.tuplet = Some(tuplet);
            }

            if flags & 0x10 != 0 {
                let (inner, velocity) = parse_signed_byte(i)?;
                i = inner;
                note.velocity = i16::from(velocity);
            }

            if flags & 0x20 != 0 {
                let (inner, fret) = parse_byte(i)?;
                i = inner;
                if note.kind == NoteType::Tie {
                    note.value = self.tied_note_value(string_index, track_index);
                } else {
                    note.value = i16::from(fret).clamp(0, 99);
                }
            }

            let mut fingering = None;
            if flags & 0x80 != 0 {
                let (inner, (left, right)) = (parse_signed_byte, parse_signed_byte).parse(i)?;
                i = inner;
                fingering = Some((left, right));
            }

            if flags & 0x08 != 0 {
                let (inner, ()) = parse_note_effect(&mut note, self.generation)(i)?;
                i = inner;
            }

            if let Some((left, right)) = fingering {
                let effect = note.effect.get_or_insert_with(NoteEffect::default);
                effect.left_hand_finger = Fingering::from_byte(left);
                effect.right_hand_finger = Fingering::from_byte(right);
            }

            Ok((i, note))
        }
    }

    /// Resolve the sounding value of a tied note from the most recent
    /// note on the same string of the same track.
    ///
    /// A tie with no predecessor is a data inconsistency, the value stays
    /// at the default of 0.
    fn tied_note_value(&self, string_index: u8, track_index: usize) -> i16 {
        self.tied_notes[track_index][string_index as usize].unwrap_or_else(|| {
            log::debug!("Tied note without predecessor on string {string_index}");
            0
        })
    }

    /// Push a finished measure on its track and fold its note values into
    /// the per-string table used for tie resolution.
    fn commit_measure(&mut self, track_index: usize, measure: Measure) {
        for voice in &measure.voices {
            for beat in &voice.beats {
                for note in &beat.notes {
                    self.tied_notes[track_index][note.string as usize] = Some(note.value);
                }
            }
        }
        self.song.tracks[track_index].measures.push(measure);
    }
}
