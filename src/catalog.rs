//! The curated software shown in the store. Changes ship through the
//! repository sync, never at runtime.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Icon theme name.
    pub icon: &'static str,
    /// Script under the repository's scripts directory used instead of apt.
    pub script_install: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct Category {
    pub name: &'static str,
    pub entries: &'static [CatalogEntry],
}

const fn entry(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    icon: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        description,
        icon,
        script_install: None,
    }
}

const fn scripted(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    icon: &'static str,
    script: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        description,
        icon,
        script_install: Some(script),
    }
}

static CATALOG: &[Category] = &[
    Category {
        name: "Educación",
        entries: &[
            entry("geogebra", "GeoGebra", "Matemáticas dinámicas", "geogebra"),
            entry("stellarium", "Stellarium", "Planetario virtual", "stellarium"),
            entry("scratch", "Scratch", "Aprender a programar", "scratch"),
            entry("gcompris-qt", "GCompris", "Suite educativa infantil", "gcompris-qt"),
            entry("klavaro", "Klavaro", "Tutor de mecanografía", "klavaro"),
        ],
    },
    Category {
        name: "Creatividad",
        entries: &[
            entry("blender", "Blender", "Modelado y animación 3D", "blender"),
            entry("inkscape", "Inkscape", "Editor de gráficos vectoriales", "inkscape"),
            entry("audacity", "Audacity", "Editor de audio", "audacity"),
            entry(
                "obs-studio",
                "OBS Studio",
                "Grabación y streaming",
                "com.obsproject.Studio",
            ),
        ],
    },
    Category {
        name: "Utilidades",
        entries: &[
            entry("vlc", "VLC", "Reproductor multimedia", "vlc"),
            scripted(
                "anydesk",
                "AnyDesk",
                "Control remoto",
                "anydesk",
                "install-anydesk.sh",
            ),
            entry("chromium", "Chromium", "Navegador web libre", "chromium-browser"),
        ],
    },
];

pub fn categories() -> &'static [Category] {
    CATALOG
}

pub fn entries() -> impl Iterator<Item = &'static CatalogEntry> {
    CATALOG.iter().flat_map(|category| category.entries.iter())
}

pub fn find(id: &str) -> Option<&'static CatalogEntry> {
    entries().find(|entry| entry.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let mut seen = HashSet::new();
        for entry in entries() {
            assert!(seen.insert(entry.id), "duplicate id {}", entry.id);
        }
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn find_returns_scripted_entries() {
        let anydesk = find("anydesk").unwrap();
        assert_eq!(anydesk.script_install, Some("install-anydesk.sh"));
        assert_eq!(find("vlc").unwrap().script_install, None);
        assert!(find("photoshop").is_none());
    }

    #[test]
    fn categories_keep_their_order() {
        let names: Vec<_> = categories().iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Educación", "Creatividad", "Utilidades"]);
    }
}
