//! Prompt assembly for the clinic assistant.
//!
//! The model only sees what is written here plus the context block produced by the
//! core library, so the scope rules live in [`SYSTEM_PROMPT`].

/// Instructions that frame every conversation turn.
pub const SYSTEM_PROMPT: &str = r#"Eres un asistente virtual del sistema OdontoApp, una aplicación de gestión odontológica.

INSTRUCCIONES IMPORTANTES:

1. ÁMBITO DE RESPUESTA:
   - SOLO responde preguntas sobre odontología, salud bucal y el sistema OdontoApp
   - Usa ÚNICAMENTE la información proporcionada en el contexto del sistema
   - NO inventes información que no esté en el contexto
   - Si no tienes la información exacta, sugiere contactar con la clínica

2. RESPUESTAS PROHIBIDAS:
   - Si te preguntan sobre temas NO relacionados (política, deportes, programación, entretenimiento, etc.):
     "Lo siento, soy un asistente especializado en OdontoApp y solo puedo ayudarte con temas
     relacionados con tu atención odontológica y el uso del sistema. ¿Hay algo sobre tus citas,
     tratamientos o servicios dentales en lo que pueda ayudarte?"

3. CÓMO RESPONDER:
   - Sé amable, profesional y conciso
   - Usa la información del paciente cuando sea relevante
   - Da instrucciones paso a paso cuando pregunten "cómo hacer algo"
   - Si preguntan por servicios, lista los disponibles con precios
   - Si preguntan por odontólogos, menciona sus nombres y horarios
   - Si preguntan sobre citas, verifica si el paciente tiene citas próximas

4. RESPONDE EN ESPAÑOL de forma clara y fácil de entender"#;

/// Static usage guide appended to the context block.
pub const USAGE_GUIDE: &str = r#"=== GUÍA DE FUNCIONALIDADES DEL SISTEMA ===

**CÓMO AGENDAR UNA CITA:**
1. Ve al menú "Mis Citas" en tu portal de paciente
2. Selecciona el odontólogo, fecha, hora y procedimiento
3. Confirma la cita

**CÓMO CANCELAR UNA CITA:**
1. Ve a "Mis Citas"
2. Busca la cita que deseas cancelar y pulsa cancelar
3. Confirma la cancelación

**CÓMO CAMBIAR MI CONTRASEÑA:**
1. Ve a "Cambiar Contraseña"
2. La nueva contraseña debe tener al menos 8 caracteres, incluir mayúsculas, minúsculas, números y caracteres especiales

**CÓMO VER MIS COMPROBANTES:**
1. Ve a "Mis Comprobantes"
2. Revisa el estado de pago (pendiente, pagado parcial, pagado total)

**CONTACTO:**
Si necesitas ayuda adicional puedes contactar directamente con la clínica a través de los canales oficiales.
"#;

/// Build the full prompt for one patient question.
pub fn build_prompt(context: &str, question: &str) -> String {
    let mut prompt = String::with_capacity(SYSTEM_PROMPT.len() + context.len() + question.len() + 96);

    prompt.push_str(SYSTEM_PROMPT);
    prompt.push_str("\n\nCONTEXTO COMPLETO DEL SISTEMA:\n");
    prompt.push_str(context.trim_end());
    prompt.push_str("\n\nPREGUNTA DEL PACIENTE:\n");
    prompt.push_str(question.trim());
    prompt.push_str("\n\nRESPUESTA:\n");

    prompt
}

/// Spanish weekday name, Monday = 0.
pub fn weekday_name(days_from_monday: u32) -> &'static str {
    match days_from_monday {
        0 => "Lunes",
        1 => "Martes",
        2 => "Miércoles",
        3 => "Jueves",
        4 => "Viernes",
        5 => "Sábado",
        _ => "Domingo",
    }
}
