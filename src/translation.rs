#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationTab {
    TranslatedChat,
    #[default]
    Transcription,
    Summary,
}

/// Meeting tools side panel. Content is placeholder; only the panel state
/// lives here.
#[derive(Debug, Clone, Default)]
pub struct TranslationPanel {
    active_tab: TranslationTab,
    captions_on: bool,
}

impl TranslationPanel {
    pub fn active_tab(&self) -> TranslationTab {
        self.active_tab
    }

    pub fn select_tab(&mut self, tab: TranslationTab) {
        self.active_tab = tab;
    }

    pub fn captions_on(&self) -> bool {
        self.captions_on
    }

    /// Flips translated captions. The caller closes the panel afterwards.
    pub fn toggle_captions(&mut self) -> bool {
        self.captions_on = !self.captions_on;
        self.captions_on
    }
}
