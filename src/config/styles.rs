// Headshot style prompts

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn person(&self) -> &'static str {
        match self {
            Gender::Male => "man",
            Gender::Female => "woman",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadshotStyle {
    Corporate,
    Casual,
    Artistic,
    Outdoor,
    Fantasy,
}

impl HeadshotStyle {
    pub const ALL: [HeadshotStyle; 5] = [
        HeadshotStyle::Corporate,
        HeadshotStyle::Casual,
        HeadshotStyle::Artistic,
        HeadshotStyle::Outdoor,
        HeadshotStyle::Fantasy,
    ];

    /// Unknown style names fall back to Corporate
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.as_str() == name)
            .unwrap_or(HeadshotStyle::Corporate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeadshotStyle::Corporate => "Corporate",
            HeadshotStyle::Casual => "Casual",
            HeadshotStyle::Artistic => "Artistic",
            HeadshotStyle::Outdoor => "Outdoor",
            HeadshotStyle::Fantasy => "Fantasy",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            HeadshotStyle::Corporate => "Professional LinkedIn-style headshot of an attractive TOK ${person} with a professional office background and formal business attire. Well-groomed appearance and fit.",
            HeadshotStyle::Casual => "Edgy headshot of an attractive TOK ${person} standing in a vibrant urban city street wearing trendy streetwear clothing and an avant-garde pose.",
            HeadshotStyle::Artistic => "Create an artistic portrait of a TOK ${person} in a dramatic, painterly style. The subject is looking slightly off-camera, with soft, diffused lighting emphasizing facial features and emotional depth. Use rich, textured brushstrokes, a muted color palette with warm undertones, and a softly blurred background that suggests depth without distraction. The overall tone should evoke introspection and timelessness, reminiscent of a classical oil painting.",
            HeadshotStyle::Outdoor => "Photograph taken of a attractive rugged outdoor survivalist TOK ${person} in awe, embracing natures wonderous vastness and beauty with a scenic background",
            HeadshotStyle::Fantasy => "Epic portrait of a TOK ${person} in a fantasy setting. The overall atmosphere is mysterious and dramatic, in the visual style of Dungeons & Dragons, Lord of the Rings, and Game of Thrones. Ultra-realistic, high detail, dark fantasy color palette, 4K resolution.",
        }
    }
}

/// Render the generation prompt for a style name and subject gender
pub fn build_prompt(style: &str, gender: Gender, additional: Option<&str>) -> String {
    let base = HeadshotStyle::from_name(style)
        .template()
        .replacen("${person}", gender.person(), 1);

    match additional.map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{} Additional details: {}", base, extra),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_substitutes_person() {
        let prompt = build_prompt("Casual", Gender::Female, None);
        assert!(prompt.starts_with("Edgy headshot of an attractive TOK woman"));
        assert!(!prompt.contains("${person}"));
    }

    #[test]
    fn test_unknown_style_falls_back_to_corporate() {
        let prompt = build_prompt("Underwater", Gender::Male, None);
        assert!(prompt.starts_with("Professional LinkedIn-style headshot of an attractive TOK man"));
    }

    #[test]
    fn test_additional_details_appended() {
        let prompt = build_prompt("Fantasy", Gender::Male, Some("wearing a red cloak"));
        assert!(prompt.ends_with(" Additional details: wearing a red cloak"));

        let blank = build_prompt("Fantasy", Gender::Male, Some("   "));
        assert!(!blank.contains("Additional details"));
    }
}
