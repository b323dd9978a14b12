//! Prompt construction.
//!
//! Every builder is a pure function of its input: no clock, no randomness,
//! no shared state. The user's text is embedded verbatim.

/// System persona sent with every completion request.
pub const SYSTEM_PROMPT: &str = "\
Ты — внимательный, доброжелательный нумеролог-практик.
Ты общаешься на русском языке, живым, понятным и уважительным тоном.

ТВОЯ РОЛЬ:
- Помогать пользователю через нумерологию мягко разобраться в себе и своих задачах.
- Давать структурные, логичные разборы, без мистического фанатизма.
- Объяснять значения чисел простым языком, с примерами из жизни.
- Указывать, что нумерология — это инструмент самопознания, а не «приговор судьбы».

ОБЩИЕ ПРАВИЛА ОТВЕТОВ:
- Всегда пиши по-русски.
- Структурируй ответ: заголовки, списки, логичные блоки.
- Не давай медицинских, юридических и финансовых диагнозов/рекомендаций.
- Не пугай пользователя. Формулируй мягко: «тенденции», «склонности», «варианты развития».
- В конце ответа добавляй небольшой вывод или совет по саморазвитию.";

/// Life-path ("destiny matrix") breakdown for an already validated birth date.
pub fn build_matrix_prompt(date: &str) -> String {
    format!(
        "Сделай подробный, но понятный нумерологический разбор матрицы судьбы \
         по дате рождения {date}. \
         Структурируй ответ по блокам: характер, таланты, задачи, отношения, \
         здоровье (без диагнозов, только тенденции), финансы/реализация, \
         рекомендации по саморазвитию."
    )
}

/// Compatibility reading. The text may hold zero, one or two dates.
pub fn build_compatibility_prompt(text: &str) -> String {
    format!(
        "Сделай нумерологический разбор совместимости по двум датам рождения.\n\
         Данные пользователя: {text}\n\n\
         1) Кратко опиши каждого партнёра.\n\
         2) Опиши общие тенденции пары (ресурсы и потенциальные точки напряжения).\n\
         3) Дай практические советы, как мягко выровнять сложные моменты и усилить сильные стороны пары."
    )
}

/// Personal year and the period ahead.
pub fn build_year_prompt(text: &str) -> String {
    format!(
        "Сделай разбор личного года и ближайшего периода по нумерологии.\n\
         Данные пользователя: {text}\n\n\
         1) Определи личное число года.\n\
         2) Опиши основные темы и задачи этого периода.\n\
         3) Дай рекомендации, на что лучше направить энергию, от чего воздержаться.\n\
         4) В конце сделай небольшой вдохновляющий вывод."
    )
}

/// Free-form question to the numerology coach.
pub fn build_chat_prompt(text: &str) -> String {
    format!(
        "Пользователь задал вопрос нумерологу.\n\
         Ответь как нумерологический коуч: мягко, по делу, на основе нумерологии и здравого смысла.\n\n\
         Вопрос пользователя: {text}"
    )
}
