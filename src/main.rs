use clap::Parser;
use gptab::{parse_gp_data, TabError};
use std::path::PathBuf;

fn main() {
    let result = main_result();
    std::process::exit(match result {
        Ok(()) => 0,
        Err(err) => {
            // use Display instead of Debug for user friendly error messages
            log::error!("{err}");
            1
        }
    });
}

fn main_result() -> Result<(), TabError> {
    // setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("gptab=info"))
        .init();

    // args
    let args = CliArgs::parse();
    let tab_file_path = PathBuf::from(args.tab_file_path);
    if !tab_file_path.exists() {
        return Err(TabError::IoError(format!(
            "Tab file not found {tab_file_path:?}"
        )));
    }

    let file_data = std::fs::read(&tab_file_path)?;
    let Some(song) = parse_gp_data(&file_data)? else {
        println!("Unsupported tablature version");
        return Ok(());
    };

    println!("version:  {}", song.version.raw);
    println!("title:    {}", song.song_info.title);
    println!("artist:   {}", song.song_info.artist);
    println!("tempo:    {}", song.tempo);
    println!("key:      {}", song.key_signature);
    println!("measures: {}", song.measure_headers.len());
    println!("tracks:   {}", song.tracks.len());
    for track in &song.tracks {
        println!(
            "  #{} {:24} strings:{} frets:{} channel:{}",
            track.index + 1,
            track.name,
            track.strings.len(),
            track.fret_count,
            track
                .channel
                .as_ref()
                .map_or_else(|| "-".to_string(), |channel| channel.channel_id.to_string()),
        );
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Path to the tablature file to inspect.
    tab_file_path: String,
}
