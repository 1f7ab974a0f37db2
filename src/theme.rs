use crate::model::ValidationError;
use rand::Rng;
use ratatui::style::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl From<Rgb> for Color {
    fn from(value: Rgb) -> Self {
        Color::Rgb(value.0, value.1, value.2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub name: &'static str,
    pub primary: Rgb,
    pub secondary: Rgb,
    pub background: Rgb,
    pub text: Rgb,
    pub success: Rgb,
    pub error: Rgb,
}

const fn palette(
    name: &'static str,
    primary: Rgb,
    secondary: Rgb,
    background: Rgb,
    text: Rgb,
) -> Palette {
    Palette {
        name,
        primary,
        secondary,
        background,
        text,
        success: Rgb(76, 175, 80),
        error: Rgb(229, 57, 53),
    }
}

pub const PALETTES: [Palette; 10] = [
    palette(
        "Professionale",
        Rgb(74, 144, 226),
        Rgb(53, 122, 189),
        Rgb(16, 18, 24),
        Rgb(230, 233, 239),
    ),
    palette("Studente", Rgb(255, 167, 38), Rgb(251, 140, 0), Rgb(24, 20, 14), Rgb(255, 243, 224)),
    palette("Chimico", Rgb(102, 187, 106), Rgb(56, 142, 60), Rgb(12, 24, 14), Rgb(232, 245, 233)),
    palette("Donna", Rgb(236, 64, 122), Rgb(194, 24, 91), Rgb(28, 12, 20), Rgb(252, 228, 236)),
    palette(
        "Artigiano",
        Rgb(141, 110, 99),
        Rgb(109, 76, 65),
        Rgb(22, 18, 16),
        Rgb(239, 235, 233),
    ),
    palette(
        "Specchio",
        Rgb(176, 190, 197),
        Rgb(120, 144, 156),
        Rgb(20, 22, 24),
        Rgb(236, 239, 241),
    ),
    palette("Magico", Rgb(171, 71, 188), Rgb(123, 31, 162), Rgb(20, 10, 26), Rgb(243, 229, 245)),
    palette("Pensieri", Rgb(38, 198, 218), Rgb(0, 151, 167), Rgb(10, 22, 26), Rgb(224, 247, 250)),
    palette("Nuvola", Rgb(144, 202, 249), Rgb(100, 181, 246), Rgb(18, 24, 32), Rgb(227, 242, 253)),
    palette("Audio", Rgb(255, 213, 79), Rgb(255, 179, 0), Rgb(26, 22, 8), Rgb(255, 248, 225)),
];

/// Selected palette. Colors are never stored, only looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThemeIndex(usize);

impl ThemeIndex {
    pub fn new(index: usize) -> Result<Self, ValidationError> {
        let mut theme = ThemeIndex::default();
        theme.set(index)?;
        Ok(theme)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    pub fn set(&mut self, index: usize) -> Result<(), ValidationError> {
        if index >= PALETTES.len() {
            return Err(ValidationError::ThemeOutOfRange {
                index,
                len: PALETTES.len(),
            });
        }
        self.0 = index;
        Ok(())
    }

    pub fn randomize(&mut self) -> usize {
        self.0 = rand::thread_rng().gen_range(0..PALETTES.len());
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn palette(&self) -> &'static Palette {
        &PALETTES[self.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_is_rejected_and_previous_kept() {
        let mut theme = ThemeIndex::new(3).unwrap();
        let err = theme.set(11).unwrap_err();
        assert_eq!(err, ValidationError::ThemeOutOfRange { index: 11, len: 10 });
        assert_eq!(theme.index(), 3);
        assert!(theme.set(10).is_err());
        assert_eq!(theme.index(), 3);
    }

    #[test]
    fn reset_and_random_stay_in_range() {
        let mut theme = ThemeIndex::new(9).unwrap();
        theme.reset();
        assert_eq!(theme.index(), 0);
        for _ in 0..50 {
            let idx = theme.randomize();
            assert!(idx < PALETTES.len());
            assert_eq!(theme.index(), idx);
        }
    }

    #[test]
    fn palette_is_pure_lookup() {
        let theme = ThemeIndex::new(6).unwrap();
        assert_eq!(theme.palette(), &PALETTES[6]);
        assert_eq!(theme.palette().name, "Magico");
        assert_eq!(Color::from(theme.palette().primary), Color::Rgb(171, 71, 188));
    }
}
