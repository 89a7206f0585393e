//! End-to-end decoding tests over synthetic tablature buffers.

#[cfg(test)]
mod tests {
    use crate::parser::song_parser::{
        parse_gp_data, BeatStatus, Fingering, NoteType, SlideType, Song,
    };
    use crate::TabError;

    fn init_logger() {
        env_logger::builder()
            .is_test(true)
            .try_init()
            .unwrap_or_default();
    }

    fn le_int(value: i32) -> [u8; 4] {
        value.to_le_bytes()
    }

    /// `[i32 total][u8 length][length bytes]` string encoding
    fn int_byte_string(text: &str) -> Vec<u8> {
        let mut data = le_int(text.len() as i32 + 1).to_vec();
        data.push(text.len() as u8);
        data.extend_from_slice(text.as_bytes());
        data
    }

    /// `[u8 length][field_size bytes]` string encoding
    fn byte_size_string(field_size: usize, text: &str) -> Vec<u8> {
        let mut data = vec![text.len() as u8];
        let mut field = text.as_bytes().to_vec();
        field.resize(field_size, 0);
        data.extend_from_slice(&field);
        data
    }

    /// `[i32 length][length bytes]` string encoding
    fn int_sized_string(text: &str) -> Vec<u8> {
        let mut data = le_int(text.len() as i32).to_vec();
        data.extend_from_slice(text.as_bytes());
        data
    }

    /// 64 channel records; percussion channels and channel 10 carry no
    /// instrument to exercise the normalization rules.
    fn midi_channel_table() -> Vec<u8> {
        let mut data = vec![];
        for channel_id in 0..64 {
            let instrument: i32 = if channel_id % 16 == 9 || channel_id == 10 {
                -1
            } else {
                25
            };
            data.extend_from_slice(&le_int(instrument));
            data.extend_from_slice(&[8, 8, 8, 8, 8, 8]);
            data.extend_from_slice(&[0, 0]);
        }
        data
    }

    fn song_info_block() -> Vec<u8> {
        let mut data = vec![];
        for text in [
            "Title",
            "Subtitle",
            "Artist",
            "Album",
            "Words",
            "Copyright",
            "Tab",
            "Instructions",
        ] {
            data.extend_from_slice(&int_byte_string(text));
        }
        data.extend_from_slice(&le_int(0)); // no notices
        data
    }

    /// Everything up to and including the channel table for a v4 file.
    fn gp4_preamble(tempo: i32) -> Vec<u8> {
        let mut data = byte_size_string(30, "FICHIER GUITAR PRO v4.00");
        data.extend_from_slice(&song_info_block());
        data.push(0); // triplet feel
        data.extend_from_slice(&le_int(0)); // lyrics track choice
        for _ in 0..5 {
            data.extend_from_slice(&le_int(0));
            data.extend_from_slice(&int_sized_string(""));
        }
        data.extend_from_slice(&le_int(tempo));
        data.push(0); // key signature root
        data.extend_from_slice(&le_int(0)); // octave
        data.extend_from_slice(&midi_channel_table());
        data
    }

    /// Everything up to and including the channel table for a v3 file.
    fn gp3_preamble(tempo: i32) -> Vec<u8> {
        let mut data = byte_size_string(30, "FICHIER GUITAR PRO v3.00");
        data.extend_from_slice(&song_info_block());
        data.push(0); // triplet feel
        data.extend_from_slice(&le_int(tempo));
        data.extend_from_slice(&le_int(0)); // key signature root, still an int
        data.extend_from_slice(&midi_channel_table());
        data
    }

    fn track_block(name: &str, string_count: i32, channel: i32) -> Vec<u8> {
        let mut data = vec![0]; // track flag
        data.extend_from_slice(&byte_size_string(40, name));
        data.extend_from_slice(&le_int(string_count));
        for tuning in [64, 59, 55, 50, 45, 40, 0] {
            data.extend_from_slice(&le_int(tuning));
        }
        data.extend_from_slice(&le_int(1)); // port
        data.extend_from_slice(&le_int(channel)); // 1-based channel table index
        data.extend_from_slice(&le_int(2)); // 1-based effect channel
        data.extend_from_slice(&le_int(24)); // fret count
        data.extend_from_slice(&le_int(0)); // capo
        data.extend_from_slice(&[255, 0, 0, 0]); // color
        data
    }

    /// A plain quarter-note beat holding the given note records.
    fn beat_with_notes(string_bitmap: u8, notes: &[&[u8]]) -> Vec<u8> {
        let mut data = vec![0x00, 0, string_bitmap];
        for note in notes {
            data.extend_from_slice(note);
        }
        data
    }

    fn measure_with_beats(beats: &[Vec<u8>]) -> Vec<u8> {
        let mut data = le_int(beats.len() as i32).to_vec();
        for beat in beats {
            data.extend_from_slice(beat);
        }
        data
    }

    fn decode(data: &[u8]) -> Song {
        parse_gp_data(data)
            .expect("decoding should succeed")
            .expect("the version should be supported")
    }

    /// Minimal v4 file: one track with one string, one 4/4 measure, one
    /// beat carrying a single open-string note.
    fn minimal_gp4_song() -> Vec<u8> {
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1)); // measure count
        data.extend_from_slice(&le_int(1)); // track count
        data.extend_from_slice(&[0x03, 4, 4]); // header with 4/4 signature
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        let beat = beat_with_notes(0x40, &[&[0x20, 1, 0]]);
        data.extend_from_slice(&measure_with_beats(&[beat]));
        data
    }

    #[test]
    fn parse_minimal_gp4_song() {
        init_logger();
        let data = minimal_gp4_song();
        let song = decode(&data);

        assert_eq!(song.version.raw, "FICHIER GUITAR PRO v4.00");
        assert_eq!(song.version.major, "v4");
        assert_eq!(song.version.minor, "00");
        assert_eq!(song.song_info.title, "Title");
        assert_eq!(song.song_info.artist, "Artist");
        assert_eq!(song.song_info.music, song.song_info.words);
        assert_eq!(song.tempo, 120);
        assert!(song.clipboard.is_none());
        let lyrics = song.lyrics.as_ref().expect("v4 files carry lyrics");
        assert_eq!(lyrics.lines.len(), 5);

        assert_eq!(song.tracks.len(), 1);
        assert_eq!(song.measure_headers.len(), 1);
        let header = &song.measure_headers[0];
        assert_eq!(header.start_time, 960);
        assert_eq!(header.time_signature.numerator, 4);
        assert_eq!(header.time_signature.denominator.value, 4);

        let track = &song.tracks[0];
        assert_eq!(track.name, "Guitar");
        assert_eq!(track.strings.len(), 1);
        assert_eq!(track.measures.len(), 1);
        let beats = &track.measures[0].voices[0].beats;
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].start, 960);
        assert_eq!(beats[0].duration.value, 4);
        assert_eq!(beats[0].status, BeatStatus::Normal);
        assert_eq!(beats[0].notes.len(), 1);
        assert_eq!(beats[0].notes[0].value, 0);
        assert_eq!(beats[0].notes[0].kind, NoteType::Normal);
        assert_eq!(beats[0].notes[0].string, 1);
    }

    #[test]
    fn decoding_is_deterministic() {
        init_logger();
        let data = minimal_gp4_song();
        let first = decode(&data);
        let second = decode(&data);
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_version_yields_no_song() {
        init_logger();
        let data = byte_size_string(30, "FICHIER GUITAR PRO v5.00");
        let song = parse_gp_data(&data).expect("soft failure is not an error");
        assert!(song.is_none());
    }

    #[test]
    fn parse_minimal_gp3_song() {
        init_logger();
        let mut data = gp3_preamble(90);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitare", 1, 1));
        let beat = beat_with_notes(0x40, &[&[0x20, 1, 3]]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let song = decode(&data);
        assert_eq!(song.version.major, "v3");
        assert_eq!(song.tempo, 90);
        assert!(song.lyrics.is_none());
        assert_eq!(song.tracks[0].measures[0].voices[0].beats[0].notes[0].value, 3);
    }

    #[test]
    fn tie_note_takes_value_of_predecessor() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(2));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&[0x00]);
        data.extend_from_slice(&track_block("Guitar", 3, 1));
        // string 3 maps to bitmap bit 0x10
        let sounding = beat_with_notes(0x10, &[&[0x20, 1, 7]]);
        let tied = beat_with_notes(0x10, &[&[0x20, 2, 0]]);
        data.extend_from_slice(&measure_with_beats(&[sounding]));
        data.extend_from_slice(&measure_with_beats(&[tied]));

        let song = decode(&data);
        let tied_note = &song.tracks[0].measures[1].voices[0].beats[0].notes[0];
        assert_eq!(tied_note.kind, NoteType::Tie);
        assert_eq!(tied_note.value, 7);
    }

    #[test]
    fn tie_note_without_predecessor_stays_at_default() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 3, 1));
        let tied = beat_with_notes(0x10, &[&[0x20, 2, 9]]);
        data.extend_from_slice(&measure_with_beats(&[tied]));

        let song = decode(&data);
        let tied_note = &song.tracks[0].measures[0].voices[0].beats[0].notes[0];
        assert_eq!(tied_note.kind, NoteType::Tie);
        assert_eq!(tied_note.value, 0);
    }

    #[test]
    fn empty_note_bitmap_yields_well_formed_beat() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        let beat = beat_with_notes(0x00, &[]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let song = decode(&data);
        let beats = &song.tracks[0].measures[0].voices[0].beats;
        assert_eq!(beats.len(), 1);
        assert!(beats[0].notes.is_empty());
        assert_eq!(beats[0].duration.value, 4);
    }

    #[test]
    fn alternate_ending_masks_accumulate() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(2));
        data.extend_from_slice(&le_int(1));
        // raw alternate values 1 and 2, no repeat begin in between
        data.extend_from_slice(&[0x13, 4, 4, 1]);
        data.extend_from_slice(&[0x10, 2]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        data.extend_from_slice(&measure_with_beats(&[]));
        data.extend_from_slice(&measure_with_beats(&[]));

        let song = decode(&data);
        assert_eq!(song.measure_headers[0].repeat_alternative, 1);
        // (1 << 2) - (1 ^ 1)
        assert_eq!(song.measure_headers[1].repeat_alternative, 4);
    }

    #[test]
    fn repeat_groups_follow_the_closing_rule() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(4));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]); // plain
        data.extend_from_slice(&[0x04]); // repeat begin
        data.extend_from_slice(&[0x10, 1]); // alternate ending
        data.extend_from_slice(&[0x00]); // plain
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        for _ in 0..4 {
            data.extend_from_slice(&measure_with_beats(&[]));
        }

        let song = decode(&data);
        assert!(song.measure_headers[1].repeat_begin);
        let groups = &song.repeat_groups;
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].measure_headers, vec![0]);
        // the alternate ending keeps the measure in the repeat group
        assert_eq!(groups[1].measure_headers, vec![1, 2]);
        assert_eq!(groups[2].measure_headers, vec![3]);
        for group in groups {
            assert!(group.is_closed);
            assert!(group.openings.is_empty());
            assert_eq!(group.closings, group.measure_headers);
        }
    }

    #[test]
    fn start_times_accumulate_over_time_signatures() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(3));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&[0x03, 6, 8]);
        data.extend_from_slice(&[0x00]); // inherits 6/8
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        for _ in 0..3 {
            data.extend_from_slice(&measure_with_beats(&[]));
        }

        let song = decode(&data);
        let headers = &song.measure_headers;
        assert_eq!(headers[0].start_time, 960);
        assert_eq!(headers[2].time_signature.numerator, 6);
        for pair in headers.windows(2) {
            let expected = pair[0].start_time
                + i64::from(pair[0].time_signature.numerator)
                    * i64::from(pair[0].time_signature.denominator.value);
            assert_eq!(pair[1].start_time, expected);
        }
    }

    #[test]
    fn percussion_channels_normalize_missing_instrument() {
        init_logger();
        let data = minimal_gp4_song();
        let song = decode(&data);
        // table: percussion channels fall back to instrument 0
        assert_eq!(song.midi_channels.len(), 64);
        assert_eq!(song.midi_channels[9].instrument, 0);
        assert_eq!(song.midi_channels[25].instrument, 0);
        // non-percussion channels keep the missing marker in the table
        assert_eq!(song.midi_channels[10].instrument, -1);
    }

    #[test]
    fn track_channel_is_copied_and_normalized() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        // references table entry 11 (0-based 10) whose instrument is -1
        data.extend_from_slice(&track_block("Bass", 1, 11));
        data.extend_from_slice(&measure_with_beats(&[]));

        let song = decode(&data);
        let channel = song.tracks[0]
            .channel
            .as_ref()
            .expect("channel should resolve");
        assert_eq!(channel.channel_id, 10);
        assert_eq!(channel.instrument, 0);
        assert_eq!(channel.effect_channel_id, 1);
        // the table entry itself is untouched by the track copy
        assert_eq!(song.midi_channels[10].instrument, -1);
    }

    #[test]
    fn out_of_range_track_channel_is_absent() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 100));
        data.extend_from_slice(&measure_with_beats(&[]));

        let song = decode(&data);
        assert!(song.tracks[0].channel.is_none());
    }

    #[test]
    fn first_measure_without_time_signature_is_fatal() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x00]);

        let err = parse_gp_data(&data).unwrap_err();
        assert!(
            matches!(err, TabError::MissingTimeSignature { index: 1 }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn truncated_file_reports_offset() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4]); // denominator byte missing

        let err = parse_gp_data(&data).unwrap_err();
        match err {
            TabError::Truncated { offset } => assert_eq!(offset, data.len()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unsupported_harmonic_code_aborts_the_decode() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        // note effect block with the harmonic bit and a bogus code
        let note: &[u8] = &[0x28, 1, 5, 0x00, 0x10, 7];
        let beat = beat_with_notes(0x40, &[note]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let err = parse_gp_data(&data).unwrap_err();
        assert!(
            matches!(err, TabError::UnsupportedNoteEffect { code: 7, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn gp3_note_effect_slide_has_no_payload() {
        init_logger();
        let mut data = gp3_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        // note effect flag byte only carries the slide presence bit
        let note: &[u8] = &[0x28, 1, 5, 0x04];
        let beat = beat_with_notes(0x40, &[note]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let song = decode(&data);
        let note = &song.tracks[0].measures[0].voices[0].beats[0].notes[0];
        let effect = note.effect.as_ref().expect("effect should be set");
        assert_eq!(effect.slides, vec![SlideType::ShiftSlideTo]);
        assert!(effect.bend.is_none());
    }

    #[test]
    fn note_dynamics_and_time_independent_duration() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        let note: &[u8] = &[0x31, 1, 2, 3, 6, 5];
        let beat = beat_with_notes(0x40, &[note]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let song = decode(&data);
        let note = &song.tracks[0].measures[0].voices[0].beats[0].notes[0];
        assert_eq!(note.duration, Some(2));
        assert_eq!(note.tuplet, Some(3));
        assert_eq!(note.velocity, 6);
        assert_eq!(note.value, 5);
    }

    #[test]
    fn hand_fingering_lands_on_the_note_effect() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        let note: &[u8] = &[0xA0, 1, 5, 1, 2];
        let beat = beat_with_notes(0x40, &[note]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let song = decode(&data);
        let note = &song.tracks[0].measures[0].voices[0].beats[0].notes[0];
        let effect = note.effect.as_ref().expect("effect should be created");
        assert_eq!(effect.left_hand_finger, Fingering::Index);
        assert_eq!(effect.right_hand_finger, Fingering::Middle);
    }

    #[test]
    fn oversized_fret_values_are_clamped() {
        init_logger();
        let mut data = gp4_preamble(120);
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&le_int(1));
        data.extend_from_slice(&[0x03, 4, 4]);
        data.extend_from_slice(&track_block("Guitar", 1, 1));
        let note: &[u8] = &[0x20, 1, 120];
        let beat = beat_with_notes(0x40, &[note]);
        data.extend_from_slice(&measure_with_beats(&[beat]));

        let song = decode(&data);
        assert_eq!(song.tracks[0].measures[0].voices[0].beats[0].notes[0].value, 99);
    }
}
