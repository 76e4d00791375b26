//! 各平台的写作提示词

use crate::publish::Platform;
use crate::source::Topic;

const WECHAT_SYSTEM: &str = "你是一个专业的公众号编辑。请根据提供的热点话题，写一篇深度、有观点的资讯类文章。格式要求：标题吸引人，正文分段清晰，语气正式但有亲和力，HTML格式输出(使用h2, p标签)，字数800字左右。";

const XHS_SYSTEM: &str = "你是一个小红书爆款博主。请根据提供的热点话题，写一篇吸引眼球的笔记。要求：标题包含emoji且极具点击欲，正文多使用emoji，语气活泼、情绪化，分点陈述，要在末尾加上相关tag。字数300字左右。";

pub fn system_prompt(platform: Platform) -> &'static str {
    match platform {
        Platform::Wechat => WECHAT_SYSTEM,
        Platform::Xiaohongshu => XHS_SYSTEM,
    }
}

pub fn user_prompt(topic: &Topic) -> String {
    format!("当前热点话题是：{}。请为此生成内容。", topic.title)
}
