//! Built-in sound collections.
//!
//! Each collection's sounds live in the audio directory as
//! `<prefix>_<sound>.dca`.

use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use tracing::info;

use super::sound::{Sound, SoundCollection, SoundKind};

struct CollectionSpec {
    prefix: &'static str,
    commands: &'static [&'static str],
    chain_with: Option<&'static str>,
    // (nombre, peso, delay de salida en ms)
    sounds: &'static [(&'static str, u32, u64)],
}

const BUILTIN: &[CollectionSpec] = &[
    CollectionSpec {
        prefix: "airhorn",
        commands: &["!airhorn"],
        chain_with: None,
        sounds: &[
            ("default", 1000, 250),
            ("reverb", 800, 250),
            ("spam", 800, 0),
            ("tripletap", 800, 250),
            ("fourtap", 800, 250),
            ("distant", 500, 250),
            ("echo", 500, 250),
            ("clownfull", 250, 250),
            ("clownshort", 250, 250),
            ("clownspam", 250, 0),
            ("highfartlong", 200, 250),
            ("highfartshort", 200, 250),
            ("midshort", 100, 250),
            ("truck", 10, 250),
        ],
    },
    CollectionSpec {
        prefix: "another",
        commands: &["!anotha", "!anothaone"],
        chain_with: Some("airhorn"),
        sounds: &[("one", 1, 250), ("one_classic", 1, 250), ("one_echo", 1, 250)],
    },
    CollectionSpec {
        prefix: "jc",
        commands: &["!johncena", "!cena"],
        chain_with: None,
        sounds: &[
            ("airhorn", 1, 250),
            ("echo", 1, 250),
            ("full", 1, 250),
            ("jc", 1, 250),
            ("nameis", 1, 250),
            ("spam", 1, 250),
        ],
    },
    CollectionSpec {
        prefix: "ethan",
        commands: &["!ethan", "!eb", "!ethanbradberry", "!h3h3"],
        chain_with: None,
        sounds: &[
            ("areyou_classic", 100, 250),
            ("areyou_condensed", 100, 250),
            ("areyou_crazy", 100, 250),
            ("areyou_ethan", 100, 250),
            ("classic", 100, 250),
            ("echo", 100, 250),
            ("high", 100, 250),
            ("slowandlow", 100, 250),
            ("cuts", 30, 250),
            ("beat", 30, 250),
            ("sodiepop", 1, 250),
        ],
    },
    CollectionSpec {
        prefix: "cow",
        commands: &["!stan", "!stanislav"],
        chain_with: None,
        sounds: &[("herd", 10, 250), ("moo", 10, 250), ("x3", 1, 250)],
    },
    CollectionSpec {
        prefix: "birthday",
        commands: &["!birthday", "!bday"],
        chain_with: None,
        sounds: &[("horn", 50, 250), ("horn3", 30, 250), ("sadhorn", 25, 250), ("weakhorn", 25, 250)],
    },
    CollectionSpec {
        prefix: "wow",
        commands: &["!wowthatscool", "!wtc", "!wow"],
        chain_with: None,
        sounds: &[("thatscool", 50, 250), ("wow", 100, 250)],
    },
    CollectionSpec {
        prefix: "bees",
        commands: &["!bees"],
        chain_with: None,
        sounds: &[
            ("bees", 100, 250),
            ("remastered", 100, 250),
            ("beedrills", 10, 250),
            ("temmie", 10, 250),
            ("too", 50, 250),
            ("junkie", 25, 250),
            ("dammit", 25, 250),
        ],
    },
    CollectionSpec {
        prefix: "ngah",
        commands: &["!ngahhh", "!ngah", "ngahhh"],
        chain_with: None,
        sounds: &[
            ("normal", 100, 250),
            ("evil", 10, 250),
            ("evil_slide", 10, 250),
            ("fast", 50, 250),
            ("faster", 50, 250),
            ("turbo", 40, 250),
            ("turboer", 30, 250),
            ("turboest", 20, 250),
            ("slow", 40, 250),
            ("turboester", 15, 250),
            ("turbostar", 10, 250),
            ("full", 1, 250),
            ("soj", 1, 250),
        ],
    },
    CollectionSpec {
        prefix: "meme",
        commands: &["!cancer", "!memes", "!dankmemes", "!maymays", "!dankmaymays"],
        chain_with: None,
        sounds: &[
            ("everythingnomegalo", 10, 250),
            ("everything", 10, 250),
            ("news", 100, 250),
            ("illegal", 100, 250),
            ("banestar", 10, 250),
            ("keemstar", 10, 250),
            ("allstar", 10, 250),
            ("noneblackhole", 10, 250),
            ("stopcoming", 10, 250),
        ],
    },
];

fn build(spec: &CollectionSpec, audio_dir: &Path) -> SoundCollection {
    let sounds = spec
        .sounds
        .iter()
        .map(|&(name, weight, delay_ms)| {
            let path = audio_dir.join(format!("{}_{}.dca", spec.prefix, name));
            Sound::new(name, weight, Duration::from_millis(delay_ms), SoundKind::OnDisk(path))
        })
        .collect();

    SoundCollection::new(
        spec.prefix,
        spec.commands.iter().map(|c| c.to_string()).collect(),
        sounds,
    )
}

/// Loads every built-in collection into memory and wires chain targets.
pub async fn load_builtin(audio_dir: &Path) -> Vec<Arc<SoundCollection>> {
    let mut loaded: HashMap<&'static str, Arc<SoundCollection>> = HashMap::new();

    // Primero las colecciones sin cadena, para que los destinos existan
    for spec in BUILTIN.iter().filter(|s| s.chain_with.is_none()) {
        let coll = build(spec, audio_dir).load().await;
        loaded.insert(spec.prefix, Arc::new(coll));
    }

    for spec in BUILTIN.iter().filter(|s| s.chain_with.is_some()) {
        let mut coll = build(spec, audio_dir).load().await;
        if let Some(target) = spec.chain_with.and_then(|name| loaded.get(name)) {
            coll = coll.with_chain(target.clone());
        }
        loaded.insert(spec.prefix, Arc::new(coll));
    }

    info!("🎺 {} colecciones de sonidos cargadas", loaded.len());

    BUILTIN
        .iter()
        .filter_map(|spec| loaded.remove(spec.prefix))
        .collect()
}
